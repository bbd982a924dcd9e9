use super::{push_hex, write_common_value, Dialect, NativeFunc, PortableFunc, SqlSyntax};
use crate::error::Result;
use crate::schema::{FieldType, TypeFlags};
use crate::value::Value;

/// Microsoft SQL Server. Geometry accessors are CLR methods, hence the
/// suffix forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsSqlDialect;

impl Dialect for MsSqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn syntax(&self) -> SqlSyntax {
        SqlSyntax::Bracket
    }

    fn format_type(&self, ty: FieldType, width: u32, flags: TypeFlags) -> Result<String> {
        let mut s = match ty {
            FieldType::Bool => "BIT".to_string(),
            FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::Int32 => "INT".to_string(),
            FieldType::Int64 => "BIGINT".to_string(),
            FieldType::Float32 => "REAL".to_string(),
            FieldType::Float64 => "FLOAT".to_string(),
            FieldType::Text if width > 0 => format!("NVARCHAR({})", width),
            FieldType::Text => "NVARCHAR(MAX)".to_string(),
            FieldType::Bin => "VARBINARY(MAX)".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::DateTime => "DATETIME2".to_string(),
            FieldType::Geometry => "GEOMETRY".to_string(),
        };
        if flags.auto_increment {
            s.push_str(" IDENTITY(1,1)");
        }
        if flags.not_null {
            s.push_str(" NOT NULL");
        }
        Ok(s)
    }

    fn write_value(&self, out: &mut String, value: &Value) {
        write_common_value(
            out,
            value,
            |out, b| out.push_str(if b { "1" } else { "0" }),
            |out, bytes| {
                out.push_str("0x");
                push_hex(out, bytes);
            },
        );
    }

    fn native_func(&self, func: PortableFunc) -> Option<NativeFunc> {
        Some(match func {
            PortableFunc::GeomFromText => NativeFunc::Prefix("geometry::STGeomFromText"),
            PortableFunc::GeomFromWkb => NativeFunc::Prefix("geometry::STGeomFromWKB"),
            PortableFunc::AsText => NativeFunc::Suffix("STAsText"),
            PortableFunc::AsWkb => NativeFunc::Suffix("STAsBinary"),
        })
    }

    /// Requires an ORDER BY in the statement, as SQL Server does.
    fn add_limit(&self, sql: &mut String, limit: u64, offset: u64) {
        sql.push_str(&format!(
            " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            offset, limit
        ));
    }

    fn max_query_params(&self) -> usize {
        2100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_type() {
        let d = MsSqlDialect;
        let plain = TypeFlags::default();
        assert_eq!(d.format_type(FieldType::Text, 0, plain).unwrap(), "NVARCHAR(MAX)");
        assert_eq!(
            d.format_type(
                FieldType::Int32,
                0,
                TypeFlags {
                    auto_increment: true,
                    not_null: false
                }
            )
            .unwrap(),
            "INT IDENTITY(1,1)"
        );
    }

    #[test]
    fn test_suffix_funcs() {
        assert_eq!(
            MsSqlDialect.native_func(PortableFunc::AsText),
            Some(NativeFunc::Suffix("STAsText"))
        );
    }
}
