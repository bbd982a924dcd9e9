//! SQL dialects: the per-engine strategy objects that decide how types,
//! literals, identifiers, pagination and portable functions are spelled.
//!
//! Dialects are stateless and live for the whole process; every logical
//! connection to an engine of a given kind shares the same instance.
use std::fmt;

use crate::error::Result;
use crate::schema::{FieldType, TypeFlags};
use crate::value::Value;

mod mssql;
mod postgres;
mod sqlite;

pub use mssql::MsSqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Prefix that marks a portable function call in SQL text.
pub const MARKER_PREFIX: &str = "dba_";

static POSTGRES: PostgresDialect = PostgresDialect;
static SQLITE: SqliteDialect = SqliteDialect;
static MSSQL: MsSqlDialect = MsSqlDialect;

pub fn postgres() -> &'static dyn Dialect {
    &POSTGRES
}

pub fn sqlite() -> &'static dyn Dialect {
    &SQLITE
}

pub fn mssql() -> &'static dyn Dialect {
    &MSSQL
}

/// Look up a built-in dialect by name (case-insensitive).
pub fn by_name(name: &str) -> Option<&'static dyn Dialect> {
    match name.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Some(postgres()),
        "sqlite" | "sqlite3" => Some(sqlite()),
        "mssql" | "sqlserver" => Some(mssql()),
        _ => None,
    }
}

/// Identifier quoting style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlSyntax {
    /// ANSI `"name"`.
    DoubleQuote,
    /// `[name]`.
    Bracket,
}

/// Functions that may appear in portable SQL as `dba_<name>(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortableFunc {
    GeomFromText,
    GeomFromWkb,
    AsText,
    AsWkb,
}

impl PortableFunc {
    pub const ALL: [PortableFunc; 4] = [
        PortableFunc::GeomFromText,
        PortableFunc::GeomFromWkb,
        PortableFunc::AsText,
        PortableFunc::AsWkb,
    ];

    /// Name as written in SQL, including the marker prefix.
    pub fn name(self) -> &'static str {
        match self {
            PortableFunc::GeomFromText => "dba_ST_GeomFromText",
            PortableFunc::GeomFromWkb => "dba_ST_GeomFromWKB",
            PortableFunc::AsText => "dba_ST_AsText",
            PortableFunc::AsWkb => "dba_ST_AsWKB",
        }
    }

    pub fn from_name(name: &str) -> Option<PortableFunc> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

/// How a dialect spells a portable function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFunc {
    /// Drop the call and keep the single argument as-is.
    Omit,
    /// `Name(args)`.
    Prefix(&'static str),
    /// `arg.Name()`.
    Suffix(&'static str),
}

/// Capability interface for one SQL engine kind.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn syntax(&self) -> SqlSyntax;

    /// Native column type for a portable type.
    fn format_type(&self, ty: FieldType, width: u32, flags: TypeFlags) -> Result<String>;

    /// Append `value` as a SQL literal.
    fn write_value(&self, out: &mut String, value: &Value) {
        write_common_value(
            out,
            value,
            |out, b| out.push_str(if b { "1" } else { "0" }),
            |out, bytes| {
                out.push_str("X'");
                push_hex(out, bytes);
                out.push('\'');
            },
        );
    }

    /// `None` means the engine has no equivalent.
    fn native_func(&self, func: PortableFunc) -> Option<NativeFunc>;

    /// Append pagination to a SELECT. `offset` of zero emits no offset.
    fn add_limit(&self, sql: &mut String, limit: u64, offset: u64) {
        sql.push_str(&format!(" LIMIT {}", limit));
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }

    fn max_query_params(&self) -> usize {
        999
    }
}

/// Shared literal writer; dialects differ only in booleans and binary.
pub(crate) fn write_common_value(
    out: &mut String,
    value: &Value,
    write_bool: impl FnOnce(&mut String, bool),
    write_bin: impl FnOnce(&mut String, &[u8]),
) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(b) => write_bool(out, *b),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => {
            if f.is_finite() {
                out.push_str(&format!("{:?}", f));
            } else {
                out.push_str("NULL");
            }
        }
        Value::Text(s) => push_squoted(out, s),
        Value::Bin(b) => write_bin(out, b),
        Value::Date(d) => push_squoted(out, &d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => {
            push_squoted(out, &dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
    }
}

/// Single-quote `text`, doubling embedded quotes.
pub(crate) fn push_squoted(out: &mut String, text: &str) {
    out.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
}

pub(crate) fn push_hex(out: &mut String, bytes: &[u8]) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn literal(d: &dyn Dialect, v: Value) -> String {
        let mut s = String::new();
        d.write_value(&mut s, &v);
        s
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("PostgreSQL").unwrap().name(), "postgres");
        assert_eq!(by_name("sqlite").unwrap().name(), "sqlite");
        assert_eq!(by_name("mssql").unwrap().syntax(), SqlSyntax::Bracket);
        assert!(by_name("oracle").is_none());
    }

    #[test]
    fn test_portable_names() {
        assert_eq!(
            PortableFunc::from_name("DBA_st_astext"),
            Some(PortableFunc::AsText)
        );
        assert_eq!(PortableFunc::from_name("ST_AsText"), None);
    }

    #[test]
    fn test_string_literals() {
        for d in [postgres(), sqlite(), mssql()] {
            assert_eq!(literal(d, Value::Text("it's".into())), "'it''s'");
            assert_eq!(literal(d, Value::Int(-3)), "-3");
            assert_eq!(literal(d, Value::Float(1.5)), "1.5");
            assert_eq!(literal(d, Value::Null), "NULL");
        }
    }

    #[test]
    fn test_bool_and_binary_literals() {
        assert_eq!(literal(postgres(), Value::Bool(true)), "TRUE");
        assert_eq!(literal(sqlite(), Value::Bool(true)), "1");
        assert_eq!(literal(mssql(), Value::Bool(false)), "0");

        let bin = Value::Bin(vec![0xde, 0xad]);
        assert_eq!(literal(postgres(), bin.clone()), "'\\xDEAD'::bytea");
        assert_eq!(literal(sqlite(), bin.clone()), "X'DEAD'");
        assert_eq!(literal(mssql(), bin), "0xDEAD");
    }

    #[test]
    fn test_date_literal() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(literal(sqlite(), Value::Date(d)), "'2024-02-29'");
    }

    #[test]
    fn test_limits() {
        let mut s = String::from("SELECT 1");
        postgres().add_limit(&mut s, 10, 20);
        assert_eq!(s, "SELECT 1 LIMIT 10 OFFSET 20");

        let mut s = String::from("SELECT 1 ORDER BY 1");
        mssql().add_limit(&mut s, 5, 0);
        assert_eq!(s, "SELECT 1 ORDER BY 1 OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY");
    }

    #[test]
    fn test_max_query_params() {
        assert_eq!(sqlite().max_query_params(), 999);
        assert_eq!(postgres().max_query_params(), 65535);
        assert_eq!(mssql().max_query_params(), 2100);
    }
}
