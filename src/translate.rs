//! Portable SQL → dialect SQL.
//!
//! Statements the grammar models go through the AST: checked out of the
//! cache, cloned, rewritten (field-name resolution, then type-driven casts)
//! and printed for the target dialect. SELECT statements that carry
//! portable function markers take a textual fallback instead, because the
//! grammar only models single-table SELECTs.
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::ast::{print_statement, AstCache, BinaryOperator, Expr, FunctionWhitelist, Statement};
use crate::dialect::{Dialect, NativeFunc, PortableFunc, MARKER_PREFIX};
use crate::error::{Error, Result};
use crate::schema::{FieldType, Schema};

static MARKER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdba_(\w+)\s*\(").expect("marker pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Expression,
}

/// Classify by the first word, skipping whitespace and opening parens.
pub fn detect_statement_type(sql: &str) -> StatementKind {
    let rest = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    let word: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    match word.to_ascii_uppercase().as_str() {
        "SELECT" | "WITH" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        _ => StatementKind::Expression,
    }
}

/// Whether `sql` calls any `dba_` function.
pub fn has_markers(sql: &str) -> bool {
    MARKER_CALL.is_match(sql)
}

/// Textual rewrite of portable function calls, for statements the grammar
/// does not model. Arguments are scanned with balanced parentheses and
/// string literals; nested markers are rewritten recursively.
pub fn bake_builtin_select(sql: &str, dialect: &dyn Dialect) -> Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut pos = 0;
    while let Some(caps) = MARKER_CALL.captures_at(sql, pos) {
        let (Some(call), Some(suffix)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        if inside_string_literal(&sql[..call.start()]) {
            out.push_str(&sql[pos..call.end()]);
            pos = call.end();
            continue;
        }

        let name = format!("{}{}", MARKER_PREFIX, suffix.as_str());
        let func = PortableFunc::from_name(&name)
            .ok_or_else(|| Error::Unsupported(format!("unknown portable function {}", name)))?;
        let close = closing_paren(sql, call.end())
            .ok_or_else(|| Error::Translate(format!("unbalanced parentheses after {}", name)))?;
        let args = bake_builtin_select(&sql[call.end()..close], dialect)?;

        out.push_str(&sql[pos..call.start()]);
        write_native_call(&mut out, dialect, func, args.trim())?;
        pos = close + 1;
    }
    out.push_str(&sql[pos..]);
    Ok(out)
}

fn inside_string_literal(prefix: &str) -> bool {
    prefix.matches('\'').count() % 2 == 1
}

/// Byte index of the `)` closing a call whose arguments start at `start`.
fn closing_paren(sql: &str, start: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut in_string = false;
    for (i, ch) in sql[start..].char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn write_native_call(
    out: &mut String,
    dialect: &dyn Dialect,
    func: PortableFunc,
    args: &str,
) -> Result<()> {
    let native = dialect.native_func(func).ok_or_else(|| {
        Error::Unsupported(format!(
            "{} is not available for {}",
            func.name(),
            dialect.name()
        ))
    })?;
    match native {
        NativeFunc::Omit => out.push_str(args),
        NativeFunc::Prefix(name) => {
            out.push_str(name);
            out.push('(');
            out.push_str(args);
            out.push(')');
        }
        NativeFunc::Suffix(method) => {
            if is_simple_operand(args) {
                out.push_str(args);
            } else {
                out.push('(');
                out.push_str(args);
                out.push(')');
            }
            out.push('.');
            out.push_str(method);
            out.push_str("()");
        }
    }
    Ok(())
}

fn is_simple_operand(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '"' | '[' | ']'))
}

/// Translation inputs bundled for repeated use.
#[derive(Debug, Clone, Copy)]
pub struct Translator<'a> {
    cache: &'a AstCache,
    field_map: Option<&'a HashMap<String, String>>,
    schema: Option<&'a Schema>,
}

impl<'a> Translator<'a> {
    pub fn new(cache: &'a AstCache) -> Self {
        Self {
            cache,
            field_map: None,
            schema: None,
        }
    }

    /// Lower-cased short name → full name, applied to column references.
    pub fn with_field_map(mut self, map: &'a HashMap<String, String>) -> Self {
        self.field_map = Some(map);
        self
    }

    /// Enables type-driven casts.
    pub fn with_schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn translate(&self, sql: &str, dialect: &'static dyn Dialect) -> Result<String> {
        translate(self.cache, sql, self.field_map, self.schema, dialect)
    }
}

pub fn translate(
    cache: &AstCache,
    sql: &str,
    field_map: Option<&HashMap<String, String>>,
    schema: Option<&Schema>,
    dialect: &'static dyn Dialect,
) -> Result<String> {
    let kind = detect_statement_type(sql);
    if kind == StatementKind::Select && has_markers(sql) {
        return bake_builtin_select(sql, dialect);
    }

    let ast = match kind {
        StatementKind::Expression => cache.get_ast_expression(sql)?,
        _ => cache.get_ast(sql)?,
    };
    let out = translate_statement(ast.statement(), field_map, schema, dialect);
    cache.release_ast(ast);
    let out = out?;
    debug!(dialect = dialect.name(), from = sql, to = %out, "translated");
    Ok(out)
}

/// Run the rewrite passes on a copy of a cached tree and print it.
pub(crate) fn translate_statement(
    cached: &Statement,
    field_map: Option<&HashMap<String, String>>,
    schema: Option<&Schema>,
    dialect: &'static dyn Dialect,
) -> Result<String> {
    let mut stmt = cached.clone();
    if let Some(map) = field_map {
        resolve_field_names(&mut stmt, map);
    }
    if let Some(schema) = schema {
        auto_cast(&mut stmt, schema);
    }
    print_statement(&stmt, dialect)
}

fn resolve_field_names(stmt: &mut Statement, map: &HashMap<String, String>) {
    stmt.walk_exprs_mut(&mut |e| {
        if let Expr::Column(name) = e {
            if let Some(full) = map.get(&name.to_lowercase()) {
                *name = full.clone();
            }
        }
    });
}

fn auto_cast(stmt: &mut Statement, schema: &Schema) {
    stmt.walk_exprs_mut(&mut |e| {
        if let Expr::Binary { left, op, right } = e {
            if matches!(op, BinaryOperator::And | BinaryOperator::Or) {
                return;
            }
            if !cast_operands(left, right, schema) {
                cast_operands(right, left, schema);
            }
        }
    });
}

/// Apply the cast rules to a (column, literal) operand pair.
fn cast_operands(column: &mut Box<Expr>, literal: &mut Box<Expr>, schema: &Schema) -> bool {
    let (col_ty, lit_ty) = match (column.unnested(), literal.unnested()) {
        (Expr::Column(name), Expr::Literal(lit)) => {
            match (schema.field_type(name), lit.field_type()) {
                (Some(c), Some(l)) => (c, l),
                _ => return false,
            }
        }
        _ => return false,
    };

    if col_ty.is_textual() && lit_ty.is_numeric() {
        wrap_in_cast(column, lit_ty);
    } else if col_ty.is_numeric() && lit_ty.is_textual() {
        wrap_in_cast(literal, col_ty);
    } else if col_ty == FieldType::Bool && lit_ty.is_numeric() {
        wrap_in_cast(literal, FieldType::Bool);
    } else {
        return false;
    }
    true
}

fn wrap_in_cast(expr: &mut Box<Expr>, ty: FieldType) {
    let inner = std::mem::replace(expr.as_mut(), Expr::Wildcard);
    **expr = Expr::Cast {
        expr: Box::new(inner),
        ty,
    };
}

/// Parse a user-supplied filter expression and reject calls to functions
/// outside `whitelist`.
pub fn verify_expression(cache: &AstCache, text: &str, whitelist: &FunctionWhitelist) -> Result<()> {
    let ast = cache.get_ast_expression(text)?;
    let disallowed = whitelist.disallowed(ast.statement());
    cache.release_ast(ast);
    match disallowed.first() {
        Some(name) => Err(Error::Translate(format!(
            "function {} is not allowed in expressions",
            name
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect;
    use crate::schema::{Field, Table};

    fn schema() -> Schema {
        Schema::new(vec![Table::new(
            "users",
            vec![
                Field::new("age", FieldType::Int64),
                Field::new("code", FieldType::Text),
                Field::new("active", FieldType::Bool),
            ],
        )])
    }

    #[test]
    fn test_detect_statement_type() {
        assert_eq!(detect_statement_type("  (SELECT 1)"), StatementKind::Select);
        assert_eq!(detect_statement_type("insert into t"), StatementKind::Insert);
        assert_eq!(detect_statement_type("\nUPDATE t"), StatementKind::Update);
        assert_eq!(detect_statement_type("DELETE FROM t"), StatementKind::Delete);
        assert_eq!(detect_statement_type("a = 1"), StatementKind::Expression);
    }

    #[test]
    fn test_has_markers() {
        assert!(has_markers("SELECT DBA_st_astext (g) FROM t"));
        assert!(!has_markers("SELECT ST_AsText(g) FROM t"));
        assert!(!has_markers("SELECT mydba_x(g) FROM t"));
    }

    #[test]
    fn test_bake_select_nested_and_quoted() {
        let sql = "SELECT dba_ST_AsText(dba_ST_GeomFromText('dba_ST_AsText(x)')) AS w FROM t";
        assert_eq!(
            bake_builtin_select(sql, dialect::postgres()).unwrap(),
            "SELECT ST_AsText(ST_GeomFromText('dba_ST_AsText(x)')) AS w FROM t"
        );
    }

    #[test]
    fn test_bake_select_suffix_and_omit() {
        let sql = "SELECT dba_ST_AsText(t.geom), dba_ST_AsText(dba_ST_GeomFromText(w)) FROM t";
        assert_eq!(
            bake_builtin_select(sql, dialect::mssql()).unwrap(),
            "SELECT t.geom.STAsText(), (geometry::STGeomFromText(w)).STAsText() FROM t"
        );
        assert_eq!(
            bake_builtin_select("SELECT dba_ST_AsWKB(g) FROM t", dialect::sqlite()).unwrap(),
            "SELECT g FROM t"
        );
    }

    #[test]
    fn test_bake_select_errors() {
        assert!(matches!(
            bake_builtin_select("SELECT dba_nope(1)", dialect::postgres()),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            bake_builtin_select("SELECT dba_ST_AsText(g FROM t", dialect::postgres()),
            Err(Error::Translate(_))
        ));
    }

    #[test]
    fn test_translate_numeric_column_text_literal() {
        let cache = AstCache::new(16);
        let s = schema();
        let out = Translator::new(&cache)
            .with_schema(&s)
            .translate("age = '5'", dialect::postgres())
            .unwrap();
        assert_eq!(out, r#""age" = CAST('5' AS BIGINT)"#);
    }

    #[test]
    fn test_translate_text_column_numeric_literal() {
        let cache = AstCache::new(16);
        let s = schema();
        let out = Translator::new(&cache)
            .with_schema(&s)
            .translate("DELETE FROM users WHERE 5 = code", dialect::sqlite())
            .unwrap();
        assert_eq!(out, r#"DELETE FROM "users" WHERE 5 = CAST("code" AS INTEGER)"#);
    }

    #[test]
    fn test_translate_bool_column() {
        let cache = AstCache::new(16);
        let s = schema();
        let out = Translator::new(&cache)
            .with_schema(&s)
            .translate("UPDATE users SET age = 1 WHERE active = 1", dialect::postgres())
            .unwrap();
        assert_eq!(
            out,
            r#"UPDATE "users" SET "age" = 1 WHERE "active" = CAST(1 AS BOOLEAN)"#
        );
    }

    #[test]
    fn test_translate_resolves_field_names() {
        let cache = AstCache::new(16);
        let s = schema();
        let map = s.short_name_map();
        let out = translate(
            &cache,
            "AGE > 3 AND code IS NULL",
            Some(&map),
            Some(&s),
            dialect::postgres(),
        )
        .unwrap();
        assert_eq!(out, r#""users"."age" > 3 AND "users"."code" IS NULL"#);
    }

    #[test]
    fn test_translate_keeps_unmapped_names() {
        let cache = AstCache::new(16);
        let s = schema();
        let map = s.short_name_map();
        assert!(!map.contains_key("zzz"));
        let out = translate(
            &cache,
            "age > 3 AND zzz = 1",
            Some(&map),
            Some(&s),
            dialect::postgres(),
        )
        .unwrap();
        assert_eq!(out, r#""users"."age" > 3 AND "zzz" = 1"#);
    }

    #[test]
    fn test_translate_releases_cached_ast() {
        let cache = AstCache::new(16);
        translate(&cache, "DELETE FROM t", None, None, dialect::postgres()).unwrap();
        let ast = cache.get_ast("DELETE FROM t").unwrap();
        assert_eq!(ast.ref_count(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_translate_select_with_markers_skips_parser() {
        let cache = AstCache::new(16);
        let out = translate(
            &cache,
            "SELECT dba_ST_AsText(g) FROM a JOIN b ON a.id = b.id",
            None,
            None,
            dialect::postgres(),
        )
        .unwrap();
        assert_eq!(out, "SELECT ST_AsText(g) FROM a JOIN b ON a.id = b.id");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_verify_expression() {
        let cache = AstCache::new(16);
        let list = FunctionWhitelist::default();
        assert!(verify_expression(&cache, "lower(name) = 'x'", &list).is_ok());
        assert!(matches!(
            verify_expression(&cache, "pg_sleep(10) IS NULL", &list),
            Err(Error::Translate(_))
        ));
        assert!(matches!(
            verify_expression(&cache, "a = = 1", &list),
            Err(Error::Parse(_))
        ));
    }
}
