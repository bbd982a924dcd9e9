use super::{push_hex, write_common_value, Dialect, NativeFunc, PortableFunc, SqlSyntax};
use crate::error::Result;
use crate::schema::{FieldType, TypeFlags};
use crate::value::Value;

/// PostgreSQL with PostGIS for geometry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn syntax(&self) -> SqlSyntax {
        SqlSyntax::DoubleQuote
    }

    fn format_type(&self, ty: FieldType, width: u32, flags: TypeFlags) -> Result<String> {
        let mut s = match ty {
            FieldType::Bool => "BOOLEAN".to_string(),
            FieldType::Int16 if flags.auto_increment => "SMALLSERIAL".to_string(),
            FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::Int32 if flags.auto_increment => "SERIAL".to_string(),
            FieldType::Int32 => "INTEGER".to_string(),
            FieldType::Int64 if flags.auto_increment => "BIGSERIAL".to_string(),
            FieldType::Int64 => "BIGINT".to_string(),
            FieldType::Float32 => "REAL".to_string(),
            FieldType::Float64 => "DOUBLE PRECISION".to_string(),
            FieldType::Text if width > 0 => format!("VARCHAR({})", width),
            FieldType::Text => "TEXT".to_string(),
            FieldType::Bin => "BYTEA".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::DateTime => "TIMESTAMP".to_string(),
            FieldType::Geometry => "GEOMETRY".to_string(),
        };
        if flags.not_null {
            s.push_str(" NOT NULL");
        }
        Ok(s)
    }

    fn write_value(&self, out: &mut String, value: &Value) {
        write_common_value(
            out,
            value,
            |out, b| out.push_str(if b { "TRUE" } else { "FALSE" }),
            |out, bytes| {
                out.push_str("'\\x");
                push_hex(out, bytes);
                out.push_str("'::bytea");
            },
        );
    }

    fn native_func(&self, func: PortableFunc) -> Option<NativeFunc> {
        Some(match func {
            PortableFunc::GeomFromText => NativeFunc::Prefix("ST_GeomFromText"),
            PortableFunc::GeomFromWkb => NativeFunc::Prefix("ST_GeomFromWKB"),
            PortableFunc::AsText => NativeFunc::Prefix("ST_AsText"),
            PortableFunc::AsWkb => NativeFunc::Prefix("ST_AsBinary"),
        })
    }

    fn max_query_params(&self) -> usize {
        65535
    }
}
