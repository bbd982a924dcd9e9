//! Dialect-aware SQL text accumulator.
//!
//! Identifiers and literals are always quoted through the bound dialect, so
//! callers can assemble statements from untrusted names and values without
//! hand-escaping.
use std::fmt;

use crate::dialect::{Dialect, SqlSyntax};
use crate::error::{Error, Result};
use crate::translate::{self, StatementKind, Translator};
use crate::value::Value;

#[derive(Clone)]
pub struct SqlBuilder {
    dialect: &'static dyn Dialect,
    text: String,
}

impl SqlBuilder {
    pub fn new(dialect: &'static dyn Dialect) -> Self {
        Self {
            dialect,
            text: String::new(),
        }
    }

    pub fn with_text(dialect: &'static dyn Dialect, text: impl Into<String>) -> Self {
        Self {
            dialect,
            text: text.into(),
        }
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self
    }

    pub fn push_char(&mut self, ch: char) -> &mut Self {
        self.text.push(ch);
        self
    }

    /// Quote a possibly dotted name segment by segment.
    pub fn identifier(&mut self, name: &str) -> &mut Self {
        push_identifier(&mut self.text, self.dialect.syntax(), name);
        self
    }

    pub fn squote(&mut self, text: &str) -> &mut Self {
        crate::dialect::push_squoted(&mut self.text, text);
        self
    }

    pub fn value(&mut self, value: &Value) -> &mut Self {
        self.dialect.write_value(&mut self.text, value);
        self
    }

    /// Append the dialect's pagination clause.
    pub fn limit(&mut self, limit: u64, offset: u64) -> &mut Self {
        self.dialect.add_limit(&mut self.text, limit, offset);
        self
    }

    /// Append a template. `%Q` takes the next argument as an identifier,
    /// `%q` as a string literal, `%s` verbatim, `%%` is a percent sign.
    /// `[name]` outside string literals becomes a quoted identifier in the
    /// dialect's own style.
    pub fn fmt(&mut self, template: &str, args: &[&str]) -> Result<&mut Self> {
        let syntax = self.dialect.syntax();
        let expected = count_placeholders(template);
        if expected != args.len() {
            return Err(Error::InvalidNumberOfParameters {
                expected,
                got: args.len(),
            });
        }

        let mut args = args.iter();
        let mut chars = template.chars().peekable();
        let mut in_string = false;
        while let Some(ch) = chars.next() {
            if in_string {
                self.text.push(ch);
                if ch == '\'' {
                    in_string = false;
                }
                continue;
            }
            match ch {
                '\'' => {
                    in_string = true;
                    self.text.push(ch);
                }
                '%' => match chars.peek().copied() {
                    Some('Q') => {
                        chars.next();
                        let arg = args.next().copied().unwrap_or_default();
                        push_identifier(&mut self.text, syntax, arg);
                    }
                    Some('q') => {
                        chars.next();
                        let arg = args.next().copied().unwrap_or_default();
                        crate::dialect::push_squoted(&mut self.text, arg);
                    }
                    Some('s') => {
                        chars.next();
                        self.text.push_str(args.next().copied().unwrap_or_default());
                    }
                    Some('%') => {
                        chars.next();
                        self.text.push('%');
                    }
                    _ => self.text.push('%'),
                },
                '[' if syntax == SqlSyntax::DoubleQuote => {
                    let rest: String = chars.clone().collect();
                    match rest.find(']') {
                        Some(end) => {
                            push_identifier(&mut self.text, syntax, &rest[..end]);
                            for _ in 0..rest[..=end].chars().count() {
                                chars.next();
                            }
                        }
                        None => self.text.push('['),
                    }
                }
                _ => self.text.push(ch),
            }
        }
        Ok(self)
    }

    /// Expand portable marker functions into the dialect's native syntax, in
    /// place. SELECT statements take the regex fallback; everything else
    /// needs a translator to parse against.
    pub fn bake_builtin_funcs(&mut self, translator: Option<&Translator<'_>>) -> Result<()> {
        if !translate::has_markers(&self.text) {
            return Ok(());
        }
        let baked = match translate::detect_statement_type(&self.text) {
            StatementKind::Select => translate::bake_builtin_select(&self.text, self.dialect)?,
            _ => match translator {
                Some(t) => t.translate(&self.text, self.dialect)?,
                None => {
                    return Err(Error::Unsupported(
                        "portable functions outside SELECT require a translator".into(),
                    ))
                }
            },
        };
        self.text = baked;
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

impl fmt::Display for SqlBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for SqlBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlBuilder")
            .field("dialect", &self.dialect.name())
            .field("text", &self.text)
            .finish()
    }
}

/// Quote a dotted name for `dialect`.
pub fn quote_identifier(dialect: &dyn Dialect, name: &str) -> String {
    let mut out = String::new();
    push_identifier(&mut out, dialect.syntax(), name);
    out
}

/// Single-quote a string literal.
pub fn squote(text: &str) -> String {
    let mut out = String::new();
    crate::dialect::push_squoted(&mut out, text);
    out
}

fn push_identifier(out: &mut String, syntax: SqlSyntax, name: &str) {
    for (i, part) in name.split('.').enumerate() {
        if i > 0 {
            out.push('.');
        }
        if part == "*" {
            out.push('*');
            continue;
        }
        match syntax {
            SqlSyntax::DoubleQuote => {
                out.push('"');
                out.push_str(&part.replace('"', "\"\""));
                out.push('"');
            }
            SqlSyntax::Bracket => {
                out.push('[');
                out.push_str(&part.replace(']', "]]"));
                out.push(']');
            }
        }
    }
}

fn count_placeholders(template: &str) -> usize {
    let mut count = 0;
    let mut in_string = false;
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\'' {
            in_string = !in_string;
        } else if ch == '%' && !in_string {
            match chars.peek() {
                Some('Q') | Some('q') | Some('s') => {
                    count += 1;
                    chars.next();
                }
                Some('%') => {
                    chars.next();
                }
                _ => {}
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstCache;
    use crate::dialect;

    #[test]
    fn test_identifier_quoting() {
        let mut b = SqlBuilder::new(dialect::postgres());
        b.identifier("public.users").push(", ").identifier("we\"ird");
        assert_eq!(b.as_str(), r#""public"."users", "we""ird""#);

        let mut b = SqlBuilder::new(dialect::mssql());
        b.identifier("dbo.t").push(" ").identifier("a]b");
        assert_eq!(b.as_str(), "[dbo].[t] [a]]b]");

        assert_eq!(quote_identifier(dialect::sqlite(), "t.*"), "\"t\".*");
    }

    #[test]
    fn test_squote() {
        assert_eq!(squote("O'Brien"), "'O''Brien'");
        let mut b = SqlBuilder::new(dialect::sqlite());
        b.squote("x").push(" ").value(&Value::Bool(true));
        assert_eq!(b.as_str(), "'x' 1");
    }

    #[test]
    fn test_fmt_placeholders() {
        let mut b = SqlBuilder::new(dialect::postgres());
        b.fmt(
            "SELECT * FROM %Q WHERE name = %q AND pct LIKE '5%%' LIMIT %s",
            &["users", "it's", "10"],
        )
        .unwrap();
        assert_eq!(
            b.as_str(),
            r#"SELECT * FROM "users" WHERE name = 'it''s' AND pct LIKE '5%%' LIMIT 10"#
        );
    }

    #[test]
    fn test_fmt_percent_escape_outside_strings() {
        let mut b = SqlBuilder::new(dialect::sqlite());
        b.fmt("SELECT 10 %% 3", &[]).unwrap();
        assert_eq!(b.as_str(), "SELECT 10 % 3");
    }

    #[test]
    fn test_fmt_bracket_shorthand() {
        let mut b = SqlBuilder::new(dialect::postgres());
        b.fmt("SELECT [id] FROM [my table] WHERE x = '[literal]'", &[])
            .unwrap();
        assert_eq!(
            b.as_str(),
            r#"SELECT "id" FROM "my table" WHERE x = '[literal]'"#
        );

        let mut b = SqlBuilder::new(dialect::mssql());
        b.fmt("SELECT [id] FROM %Q", &["t"]).unwrap();
        assert_eq!(b.as_str(), "SELECT [id] FROM [t]");
    }

    #[test]
    fn test_fmt_argument_count() {
        let mut b = SqlBuilder::new(dialect::postgres());
        let err = b.fmt("SELECT %Q, %Q", &["a"]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidNumberOfParameters {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_bake_without_markers_is_noop() {
        let mut b = SqlBuilder::with_text(dialect::postgres(), "UPDATE t SET a = 1");
        b.bake_builtin_funcs(None).unwrap();
        assert_eq!(b.as_str(), "UPDATE t SET a = 1");
    }

    #[test]
    fn test_bake_select_uses_regex_path() {
        let mut b = SqlBuilder::with_text(
            dialect::postgres(),
            "SELECT dba_ST_AsText(geom) FROM parcels p JOIN owners o ON o.id = p.owner",
        );
        b.bake_builtin_funcs(None).unwrap();
        assert_eq!(
            b.as_str(),
            "SELECT ST_AsText(geom) FROM parcels p JOIN owners o ON o.id = p.owner"
        );
    }

    #[test]
    fn test_bake_insert_requires_translator() {
        let sql = "INSERT INTO parcels (geom) VALUES (dba_ST_GeomFromText('POINT(1 2)'))";
        let mut b = SqlBuilder::with_text(dialect::sqlite(), sql);
        assert!(matches!(
            b.bake_builtin_funcs(None),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(b.as_str(), sql);

        let cache = AstCache::new(16);
        let translator = Translator::new(&cache);
        b.bake_builtin_funcs(Some(&translator)).unwrap();
        assert_eq!(
            b.as_str(),
            r#"INSERT INTO "parcels" ("geom") VALUES (GeomFromText('POINT(1 2)'))"#
        );
    }
}
