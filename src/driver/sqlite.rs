//! SQLite driver on rusqlite. `ConnDesc::database` is the file path.
use std::any::Any;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};
use tracing::debug;

use super::{BufferedRows, Driver, RawConn, RawRows, RawStmt};
use crate::connstr::ConnDesc;
use crate::db::Conn;
use crate::dialect::{self, Dialect};
use crate::error::{Error, Result};
use crate::schema::{
    Field, FieldType, GenericSchemaWriter, Schema, SchemaReader, SchemaWriter, Table, TypeFlags,
};
use crate::value::Value;

pub const DRIVER_NAME: &str = "sqlite";

static SCHEMA_WRITER: GenericSchemaWriter = GenericSchemaWriter;

#[derive(Debug, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn default_dialect(&self) -> &'static dyn Dialect {
        dialect::sqlite()
    }

    fn connect(&self, desc: &ConnDesc) -> Result<Box<dyn RawConn>> {
        let path = if desc.database.is_empty() {
            ":memory:"
        } else {
            desc.database.as_str()
        };
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| Error::connect_failed(format!("{}: {}", path, e)))?;
        debug!(path, "opened sqlite connection");
        Ok(Box::new(SqliteConn { conn: Some(conn) }))
    }

    fn schema_reader(&self) -> Option<&dyn SchemaReader> {
        Some(self)
    }

    fn schema_writer(&self) -> Option<&dyn SchemaWriter> {
        Some(&SCHEMA_WRITER)
    }
}

impl SchemaReader for SqliteDriver {
    fn read_schema(&self, conn: &Conn) -> Result<Schema> {
        let names = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )?
            .map(|row| Ok(row?.into_values().into_iter().next()))
            .collect::<Result<Vec<_>>>()?;

        let mut tables = Vec::new();
        for name in names.into_iter().flatten() {
            let Value::Text(name) = name else { continue };
            let mut fields = Vec::new();
            let columns = conn.query(
                "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)",
                &[Value::Text(name.clone())],
            )?;
            for row in columns {
                let row = row?;
                let col_name = row.get(0).and_then(Value::as_str).unwrap_or_default();
                let decl = row.get(1).and_then(Value::as_str).unwrap_or_default();
                let not_null = row.get(2).and_then(Value::as_i64).unwrap_or(0) != 0;
                let pk = row.get(3).and_then(Value::as_i64).unwrap_or(0) != 0;
                let mut field = Field::new(
                    col_name,
                    FieldType::from_sql_name(decl).unwrap_or(FieldType::Text),
                );
                field.flags = TypeFlags {
                    auto_increment: pk && decl.eq_ignore_ascii_case("INTEGER"),
                    not_null,
                };
                fields.push(field);
            }
            tables.push(Table::new(name, fields));
        }
        Ok(Schema::new(tables))
    }
}

struct SqliteConn {
    conn: Option<Connection>,
}

impl SqliteConn {
    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::ConnectionLost("sqlite connection already closed".into()))
    }

    fn batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql).map_err(map_error)
    }
}

struct SqliteStmt {
    sql: String,
    params: usize,
}

impl RawStmt for SqliteStmt {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn param_count(&self) -> usize {
        self.params
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl RawConn for SqliteConn {
    fn dialect(&self) -> Option<&'static dyn Dialect> {
        Some(dialect::sqlite())
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn RawStmt>> {
        // Statements borrow the connection, so only the text is kept; the
        // rusqlite statement cache makes the second prepare cheap.
        let stmt = self.conn()?.prepare_cached(sql).map_err(map_error)?;
        Ok(Box::new(SqliteStmt {
            sql: sql.to_string(),
            params: stmt.parameter_count(),
        }))
    }

    fn execute(&mut self, stmt: &dyn RawStmt, params: &[Value]) -> Result<u64> {
        let mut prepared = self.conn()?.prepare_cached(stmt.sql()).map_err(map_error)?;
        let affected = prepared
            .execute(params_from_iter(params.iter()))
            .map_err(map_error)?;
        Ok(affected as u64)
    }

    fn query(&mut self, stmt: &dyn RawStmt, params: &[Value]) -> Result<Box<dyn RawRows>> {
        let mut prepared = self.conn()?.prepare_cached(stmt.sql()).map_err(map_error)?;
        let columns: Vec<String> = prepared
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();
        let mut rows = prepared
            .query(params_from_iter(params.iter()))
            .map_err(map_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_error)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_value_ref(row.get_ref(i).map_err(map_error)?));
            }
            out.push(values);
        }
        Ok(Box::new(BufferedRows::new(columns, out)))
    }

    fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.batch("ROLLBACK")
    }

    fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| map_error(e)),
            None => Ok(()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(*b as i64)),
            Value::Int(i) => ToSqlOutput::Owned(Sql::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bin(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Date(d) => ToSqlOutput::Owned(Sql::Text(d.format("%Y-%m-%d").to_string())),
            Value::DateTime(dt) => ToSqlOutput::Owned(Sql::Text(
                dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            )),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bin(b.to_vec()),
    }
}

/// Map SQLite result codes onto the tagged error categories.
fn map_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(code, msg) => {
            let text = msg.clone().unwrap_or_else(|| err.to_string());
            classify(code, text)
        }
        // Errors pointing at a token of the input, raised while preparing.
        rusqlite::Error::SqlInputError { error, msg, .. } => classify(error, msg.clone()),
        rusqlite::Error::InvalidParameterCount(got, expected) => Error::InvalidNumberOfParameters {
            expected: *expected,
            got: *got,
        },
        _ => Error::Driver(err.to_string()),
    }
}

fn classify(code: &rusqlite::ffi::Error, text: String) -> Error {
    match code.code {
        ErrorCode::ConstraintViolation
            if matches!(
                code.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            ) =>
        {
            Error::key_violation(text)
        }
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Error::database_busy(text),
        ErrorCode::CannotOpen => Error::connect_failed(text),
        _ if text.starts_with("no such table") => Error::table_not_found(text),
        _ if text.starts_with("no such column") => Error::field_not_found(text),
        _ if text.contains("already exists") => Error::relation_already_exists(text),
        _ => Error::Driver(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connstr::ConnDesc;

    fn open(dir: &tempfile::TempDir) -> Box<dyn RawConn> {
        let path = dir.path().join("test.db");
        let desc = ConnDesc::new(DRIVER_NAME, "", 0, path.to_string_lossy(), "", "");
        SqliteDriver.connect(&desc).unwrap()
    }

    #[test]
    fn test_execute_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open(&dir);
        let create = conn
            .prepare("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, data BLOB)")
            .unwrap();
        conn.execute(create.as_ref(), &[]).unwrap();

        let insert = conn
            .prepare("INSERT INTO t (name, data) VALUES (?1, ?2)")
            .unwrap();
        assert_eq!(insert.param_count(), 2);
        let n = conn
            .execute(
                insert.as_ref(),
                &[Value::Text("a".into()), Value::Bin(vec![1, 2])],
            )
            .unwrap();
        assert_eq!(n, 1);

        let select = conn.prepare("SELECT id, name, data FROM t").unwrap();
        let mut rows = conn.query(select.as_ref(), &[]).unwrap();
        assert_eq!(rows.columns(), &["id", "name", "data"]);
        assert_eq!(
            rows.next_row().unwrap(),
            Some(vec![
                Value::Int(1),
                Value::Text("a".into()),
                Value::Bin(vec![1, 2])
            ])
        );
        assert_eq!(rows.next_row().unwrap(), None);
        conn.close().unwrap();
    }

    #[test]
    fn test_error_categories() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open(&dir);
        let err = conn.prepare("SELECT * FROM missing").err().unwrap();
        assert!(err.is_table_not_found());

        let create = conn.prepare("CREATE TABLE k (id INTEGER PRIMARY KEY)").unwrap();
        conn.execute(create.as_ref(), &[]).unwrap();
        let insert = conn.prepare("INSERT INTO k (id) VALUES (1)").unwrap();
        conn.execute(insert.as_ref(), &[]).unwrap();
        let err = conn.execute(insert.as_ref(), &[]).unwrap_err();
        assert!(err.is_key_violation());

        let again = conn.prepare("CREATE TABLE k (id INTEGER)").unwrap();
        let err = conn.execute(again.as_ref(), &[]).unwrap_err();
        assert_eq!(
            err.category(),
            Some(crate::error::ErrorCategory::RelationAlreadyExists)
        );
    }

    #[test]
    fn test_unknown_column_at_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open(&dir);
        let create = conn.prepare("CREATE TABLE k (id INTEGER)").unwrap();
        conn.execute(create.as_ref(), &[]).unwrap();

        let err = conn.prepare("SELECT nope FROM k").err().unwrap();
        assert_eq!(
            err.category(),
            Some(crate::error::ErrorCategory::FieldNotFound)
        );
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open(&dir);
        let create = conn.prepare("CREATE TABLE t (v INTEGER)").unwrap();
        conn.execute(create.as_ref(), &[]).unwrap();

        conn.begin().unwrap();
        let insert = conn.prepare("INSERT INTO t (v) VALUES (1)").unwrap();
        conn.execute(insert.as_ref(), &[]).unwrap();
        conn.rollback().unwrap();

        let count = conn.prepare("SELECT COUNT(*) FROM t").unwrap();
        let mut rows = conn.query(count.as_ref(), &[]).unwrap();
        assert_eq!(rows.next_row().unwrap(), Some(vec![Value::Int(0)]));
    }

    #[test]
    fn test_closed_connection_reports_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open(&dir);
        conn.close().unwrap();
        assert!(conn.prepare("SELECT 1").err().unwrap().is_connection_lost());
    }
}
