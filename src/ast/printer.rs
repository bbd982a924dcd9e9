//! Portable AST → dialect SQL.
use super::types::*;
use crate::dialect::{Dialect, NativeFunc, PortableFunc};
use crate::error::{Error, Result};
use crate::schema::TypeFlags;
use crate::sqlbuilder::SqlBuilder;
use crate::value::Value;

/// Print `stmt` for `dialect`, expanding portable function calls.
pub fn print_statement(stmt: &Statement, dialect: &'static dyn Dialect) -> Result<String> {
    let mut b = SqlBuilder::new(dialect);
    match stmt {
        Statement::Select(s) => print_select(&mut b, s)?,
        Statement::Insert(i) => {
            b.push("INSERT INTO ").identifier(&i.table);
            if !i.columns.is_empty() {
                b.push(" (");
                for (n, col) in i.columns.iter().enumerate() {
                    if n > 0 {
                        b.push(", ");
                    }
                    b.identifier(col);
                }
                b.push(")");
            }
            b.push(" VALUES ");
            for (n, row) in i.rows.iter().enumerate() {
                if n > 0 {
                    b.push(", ");
                }
                b.push("(");
                print_list(&mut b, row)?;
                b.push(")");
            }
        }
        Statement::Update(u) => {
            b.push("UPDATE ");
            print_table(&mut b, &u.table);
            b.push(" SET ");
            for (n, a) in u.assignments.iter().enumerate() {
                if n > 0 {
                    b.push(", ");
                }
                b.identifier(&a.column).push(" = ");
                print_expr(&mut b, &a.value)?;
            }
            print_filter(&mut b, u.filter.as_ref())?;
        }
        Statement::Delete(d) => {
            b.push("DELETE FROM ");
            print_table(&mut b, &d.table);
            print_filter(&mut b, d.filter.as_ref())?;
        }
        Statement::Expr(e) => print_expr(&mut b, e)?,
    }
    Ok(b.into_string())
}

fn print_select(b: &mut SqlBuilder, s: &SelectStmt) -> Result<()> {
    b.push("SELECT ");
    if s.distinct {
        b.push("DISTINCT ");
    }
    for (n, item) in s.projection.iter().enumerate() {
        if n > 0 {
            b.push(", ");
        }
        match item {
            SelectItem::Wildcard => {
                b.push("*");
            }
            SelectItem::Expr { expr, alias } => {
                print_expr(b, expr)?;
                if let Some(alias) = alias {
                    b.push(" AS ").identifier(alias);
                }
            }
        }
    }
    if let Some(table) = &s.from {
        b.push(" FROM ");
        print_table(b, table);
    }
    print_filter(b, s.filter.as_ref())?;
    if !s.order_by.is_empty() {
        b.push(" ORDER BY ");
        for (n, o) in s.order_by.iter().enumerate() {
            if n > 0 {
                b.push(", ");
            }
            print_expr(b, &o.expr)?;
            if !o.asc {
                b.push(" DESC");
            }
        }
    }
    if s.limit.is_some() || s.offset.is_some() {
        // An offset alone still needs a limit clause in most engines.
        b.limit(
            s.limit.unwrap_or(i64::MAX as u64),
            s.offset.unwrap_or(0),
        );
    }
    Ok(())
}

fn print_table(b: &mut SqlBuilder, table: &TableName) {
    b.identifier(&table.name);
    if let Some(alias) = &table.alias {
        b.push(" ").identifier(alias);
    }
}

fn print_filter(b: &mut SqlBuilder, filter: Option<&Expr>) -> Result<()> {
    if let Some(filter) = filter {
        b.push(" WHERE ");
        print_expr(b, filter)?;
    }
    Ok(())
}

fn print_list(b: &mut SqlBuilder, exprs: &[Expr]) -> Result<()> {
    for (n, e) in exprs.iter().enumerate() {
        if n > 0 {
            b.push(", ");
        }
        print_expr(b, e)?;
    }
    Ok(())
}

pub(crate) fn print_expr(b: &mut SqlBuilder, expr: &Expr) -> Result<()> {
    match expr {
        Expr::Column(name) => {
            b.identifier(name);
        }
        Expr::Literal(lit) => print_literal(b, lit)?,
        Expr::Param(p) => {
            b.push(p);
        }
        Expr::Binary { left, op, right } => {
            print_expr(b, left)?;
            b.push(" ").push(op.as_sql()).push(" ");
            print_expr(b, right)?;
        }
        Expr::Unary { op, expr } => {
            b.push(match op {
                UnaryOperator::Not => "NOT ",
                UnaryOperator::Minus => "-",
                UnaryOperator::Plus => "+",
            });
            print_expr(b, expr)?;
        }
        Expr::Function { name, args } => print_function(b, name, args)?,
        Expr::Cast { expr, ty } => {
            let native = b.dialect().format_type(*ty, 0, TypeFlags::default())?;
            b.push("CAST(");
            print_expr(b, expr)?;
            b.push(" AS ").push(&native).push(")");
        }
        Expr::IsNull { expr, negated } => {
            print_expr(b, expr)?;
            b.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            print_expr(b, expr)?;
            b.push(if *negated { " NOT IN (" } else { " IN (" });
            print_list(b, list)?;
            b.push(")");
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            print_expr(b, expr)?;
            b.push(if *negated {
                " NOT BETWEEN "
            } else {
                " BETWEEN "
            });
            print_expr(b, low)?;
            b.push(" AND ");
            print_expr(b, high)?;
        }
        Expr::Nested(inner) => {
            b.push("(");
            print_expr(b, inner)?;
            b.push(")");
        }
        Expr::Wildcard => {
            b.push("*");
        }
    }
    Ok(())
}

fn print_literal(b: &mut SqlBuilder, lit: &Literal) -> Result<()> {
    match lit {
        Literal::Null => {
            b.push("NULL");
        }
        Literal::Bool(v) => {
            b.value(&Value::Bool(*v));
        }
        Literal::Int(i) => {
            b.push(&i.to_string());
        }
        Literal::Float(f) => {
            b.push(f);
        }
        Literal::Text(s) => {
            b.squote(s);
        }
        Literal::Hex(digits) => {
            let bytes = decode_hex(digits)
                .ok_or_else(|| Error::Translate(format!("invalid binary literal X'{}'", digits)))?;
            b.value(&Value::Bin(bytes));
        }
    }
    Ok(())
}

fn print_function(b: &mut SqlBuilder, name: &str, args: &[Expr]) -> Result<()> {
    let Some(func) = PortableFunc::from_name(name) else {
        b.push(name).push("(");
        print_list(b, args)?;
        b.push(")");
        return Ok(());
    };

    let dialect = b.dialect();
    let native = dialect.native_func(func).ok_or_else(|| {
        Error::Unsupported(format!(
            "{} is not available for {}",
            func.name(),
            dialect.name()
        ))
    })?;
    match native {
        NativeFunc::Prefix(native_name) => {
            b.push(native_name).push("(");
            print_list(b, args)?;
            b.push(")");
        }
        NativeFunc::Omit => print_expr(b, single_arg(func, args)?)?,
        NativeFunc::Suffix(method) => {
            let arg = single_arg(func, args)?;
            if matches!(arg, Expr::Column(_) | Expr::Nested(_)) {
                print_expr(b, arg)?;
            } else {
                b.push("(");
                print_expr(b, arg)?;
                b.push(")");
            }
            b.push(".").push(method).push("()");
        }
    }
    Ok(())
}

fn single_arg(func: PortableFunc, args: &[Expr]) -> Result<&Expr> {
    match args {
        [arg] => Ok(arg),
        _ => Err(Error::Translate(format!(
            "{} takes one argument, got {}",
            func.name(),
            args.len()
        ))),
    }
}

fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::{parse_expression, parse_statement};
    use crate::dialect;

    fn print(sql: &str, d: &'static dyn Dialect) -> String {
        print_statement(&parse_statement(sql).unwrap(), d).unwrap()
    }

    #[test]
    fn test_print_insert() {
        assert_eq!(
            print("INSERT INTO t (a, b) VALUES (1, 'x''y'), (NULL, $1)", dialect::postgres()),
            r#"INSERT INTO "t" ("a", "b") VALUES (1, 'x''y'), (NULL, $1)"#
        );
    }

    #[test]
    fn test_print_update_brackets() {
        assert_eq!(
            print("UPDATE t SET a = a + 1 WHERE b IN (1, 2)", dialect::mssql()),
            "UPDATE [t] SET [a] = [a] + 1 WHERE [b] IN (1, 2)"
        );
    }

    #[test]
    fn test_print_select_limit() {
        assert_eq!(
            print(
                "SELECT a, b AS c FROM t WHERE NOT (a > 1) ORDER BY a DESC LIMIT 5 OFFSET 10",
                dialect::sqlite()
            ),
            r#"SELECT "a", "b" AS "c" FROM "t" WHERE NOT ("a" > 1) ORDER BY "a" DESC LIMIT 5 OFFSET 10"#
        );
        assert_eq!(
            print("SELECT a FROM t ORDER BY a LIMIT 5", dialect::mssql()),
            "SELECT [a] FROM [t] ORDER BY [a] OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn test_print_literals_per_dialect() {
        let stmt = parse_statement("INSERT INTO t (a, b) VALUES (TRUE, X'0aff')").unwrap();
        assert_eq!(
            print_statement(&stmt, dialect::postgres()).unwrap(),
            r#"INSERT INTO "t" ("a", "b") VALUES (TRUE, '\x0AFF'::bytea)"#
        );
        assert_eq!(
            print_statement(&stmt, dialect::mssql()).unwrap(),
            "INSERT INTO [t] ([a], [b]) VALUES (1, 0x0AFF)"
        );
    }

    #[test]
    fn test_print_portable_functions() {
        let stmt = parse_statement(
            "UPDATE p SET g = dba_ST_GeomFromText('POINT(0 0)') WHERE dba_ST_AsText(g) IS NULL",
        )
        .unwrap();
        assert_eq!(
            print_statement(&stmt, dialect::postgres()).unwrap(),
            r#"UPDATE "p" SET "g" = ST_GeomFromText('POINT(0 0)') WHERE ST_AsText("g") IS NULL"#
        );
        assert_eq!(
            print_statement(&stmt, dialect::mssql()).unwrap(),
            "UPDATE [p] SET [g] = geometry::STGeomFromText('POINT(0 0)') WHERE [g].STAsText() IS NULL"
        );
    }

    #[test]
    fn test_print_omitted_function() {
        let stmt = parse_statement("INSERT INTO p (g) VALUES (dba_ST_GeomFromWKB($1))").unwrap();
        assert_eq!(
            print_statement(&stmt, dialect::sqlite()).unwrap(),
            r#"INSERT INTO "p" ("g") VALUES ($1)"#
        );
    }

    #[test]
    fn test_print_expression() {
        let e = parse_expression("a BETWEEN 1 AND 2 AND b IS NOT NULL").unwrap();
        assert_eq!(
            print_statement(&Statement::Expr(e), dialect::postgres()).unwrap(),
            r#""a" BETWEEN 1 AND 2 AND "b" IS NOT NULL"#
        );
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("0aFF"), Some(vec![0x0a, 0xff]));
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
