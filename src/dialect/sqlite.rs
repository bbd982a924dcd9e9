use super::{Dialect, NativeFunc, PortableFunc, SqlSyntax};
use crate::error::Result;
use crate::schema::{FieldType, TypeFlags};

/// SQLite, with SpatiaLite function names. Geometry is stored as raw WKB,
/// so the WKB conversions disappear.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn syntax(&self) -> SqlSyntax {
        SqlSyntax::DoubleQuote
    }

    fn format_type(&self, ty: FieldType, _width: u32, flags: TypeFlags) -> Result<String> {
        let mut s = match ty {
            FieldType::Bool
            | FieldType::Int16
            | FieldType::Int32
            | FieldType::Int64 => "INTEGER".to_string(),
            FieldType::Float32 | FieldType::Float64 => "REAL".to_string(),
            FieldType::Text | FieldType::Date | FieldType::DateTime => "TEXT".to_string(),
            FieldType::Bin | FieldType::Geometry => "BLOB".to_string(),
        };
        // SQLite only auto-increments an INTEGER PRIMARY KEY.
        if flags.auto_increment {
            s.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if flags.not_null {
            s.push_str(" NOT NULL");
        }
        Ok(s)
    }

    fn native_func(&self, func: PortableFunc) -> Option<NativeFunc> {
        Some(match func {
            PortableFunc::GeomFromText => NativeFunc::Prefix("GeomFromText"),
            PortableFunc::GeomFromWkb => NativeFunc::Omit,
            PortableFunc::AsText => NativeFunc::Prefix("AsText"),
            PortableFunc::AsWkb => NativeFunc::Omit,
        })
    }
}
