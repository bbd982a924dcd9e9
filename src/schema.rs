//! Minimal schema model used for field-name resolution and type-driven
//! casts during translation, and by the driver schema capabilities.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::Conn;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::sqlbuilder::SqlBuilder;

/// Portable column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    Bin,
    Date,
    DateTime,
    Geometry,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Int16
                | FieldType::Int32
                | FieldType::Int64
                | FieldType::Float32
                | FieldType::Float64
        )
    }

    pub fn is_textual(self) -> bool {
        self == FieldType::Text
    }

    /// Map an engine type name (as written in SQL or reported by a catalog)
    /// to a portable type. Width/precision suffixes are ignored.
    pub fn from_sql_name(name: &str) -> Option<FieldType> {
        let upper = name.trim().to_ascii_uppercase();
        let base = upper
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or("");
        let ty = match base {
            "BOOL" | "BOOLEAN" | "BIT" => FieldType::Bool,
            "SMALLINT" | "INT2" => FieldType::Int16,
            "INT" | "INT4" | "INTEGER" | "MEDIUMINT" => FieldType::Int32,
            "BIGINT" | "INT8" | "BIGSERIAL" | "SERIAL" => FieldType::Int64,
            "REAL" | "FLOAT4" => FieldType::Float32,
            "FLOAT" | "FLOAT8" | "DOUBLE" | "NUMERIC" | "DECIMAL" => FieldType::Float64,
            "TEXT" | "VARCHAR" | "CHAR" | "NVARCHAR" | "NCHAR" | "CHARACTER" | "CLOB"
            | "STRING" => FieldType::Text,
            "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => FieldType::Bin,
            "DATE" => FieldType::Date,
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" | "DATETIME2" => FieldType::DateTime,
            "GEOMETRY" | "GEOGRAPHY" => FieldType::Geometry,
            _ => return None,
        };
        Some(ty)
    }
}

/// Column modifiers passed to [`Dialect::format_type`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFlags {
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub flags: TypeFlags,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            width: 0,
            flags: TypeFlags::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Table {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Look up a field by `table.field` or by an unambiguous short name.
    pub fn find_field(&self, name: &str) -> Option<&Field> {
        if let Some((table, field)) = name.rsplit_once('.') {
            return self.table(table)?.field(field);
        }
        let mut found = self.tables.iter().filter_map(|t| t.field(name));
        let first = found.next()?;
        if found.next().is_some() {
            // Ambiguous short name.
            return None;
        }
        Some(first)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.find_field(name).map(|f| f.ty)
    }

    /// Lower-cased short field name → `table.field`, for every short name
    /// that occurs in exactly one table.
    pub fn short_name_map(&self) -> HashMap<String, String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut map = HashMap::new();
        for table in &self.tables {
            for field in &table.fields {
                let key = field.name.to_lowercase();
                *counts.entry(key.clone()).or_default() += 1;
                map.insert(key, format!("{}.{}", table.name, field.name));
            }
        }
        map.retain(|k, _| counts.get(k) == Some(&1));
        map
    }
}

/// Reads table definitions through an open connection.
pub trait SchemaReader: Send + Sync {
    fn read_schema(&self, conn: &Conn) -> Result<Schema>;
}

/// Produces DDL for a table definition.
pub trait SchemaWriter: Send + Sync {
    fn create_table_sql(&self, dialect: &'static dyn Dialect, table: &Table) -> Result<String>;
}

/// `CREATE TABLE` writer driven purely by the dialect's type formatting.
#[derive(Debug, Default)]
pub struct GenericSchemaWriter;

impl SchemaWriter for GenericSchemaWriter {
    fn create_table_sql(&self, dialect: &'static dyn Dialect, table: &Table) -> Result<String> {
        let mut b = SqlBuilder::new(dialect);
        b.push("CREATE TABLE ").identifier(&table.name).push(" (");
        for (i, field) in table.fields.iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            let ty = dialect.format_type(field.ty, field.width, field.flags)?;
            b.identifier(&field.name).push(" ").push(&ty);
        }
        b.push(")");
        Ok(b.into_string())
    }
}
