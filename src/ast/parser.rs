//! SQL text → portable AST.
//!
//! `sqlparser` is the grammar front end; its tree is converted into
//! [`super::types`] so the rest of the crate never depends on sqlparser's
//! representation. Constructs outside the portable subset are rejected as
//! parse errors rather than passed through.
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser as SqlParser, ParserError};

use super::types::*;
use crate::error::ParseError;
use crate::schema::FieldType;

/// Prefix used to parse a bare expression as the filter of a dummy SELECT.
pub const EXPR_WRAPPER: &str = "SELECT * FROM _dba_expr WHERE ";

static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*at Line: (\d+), Column: (\d+)").expect("location pattern is valid")
});

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Parse exactly one statement.
pub fn parse_statement(sql: &str) -> ParseResult<Statement> {
    let mut statements = SqlParser::parse_sql(&GenericDialect {}, sql).map_err(convert_error)?;
    match statements.len() {
        1 => convert_statement(statements.remove(0)),
        0 => Err(ParseError::new("empty statement")),
        n => Err(ParseError::new(format!("expected 1 statement, found {}", n))),
    }
}

/// Parse a bare expression. Error columns on the first line refer to `text`,
/// not to the wrapping statement.
pub fn parse_expression(text: &str) -> ParseResult<Expr> {
    let wrapped = format!("{}{}", EXPR_WRAPPER, text);
    let stmt = parse_statement(&wrapped).map_err(unwrap_location)?;
    match stmt {
        Statement::Select(SelectStmt {
            filter: Some(filter),
            order_by,
            limit: None,
            offset: None,
            ..
        }) if order_by.is_empty() => Ok(filter),
        _ => Err(ParseError::new("trailing clauses after expression")),
    }
}

fn unwrap_location(mut err: ParseError) -> ParseError {
    if err.line == Some(1) {
        let wrapper = EXPR_WRAPPER.len() as u64;
        err.column = err.column.map(|c| c.saturating_sub(wrapper).max(1));
    }
    err
}

fn convert_error(err: ParserError) -> ParseError {
    let raw = match err {
        ParserError::TokenizerError(s) | ParserError::ParserError(s) => s,
        ParserError::RecursionLimitExceeded => return ParseError::new("recursion limit exceeded"),
    };
    match LOCATION.captures(&raw) {
        Some(caps) => {
            let line = caps[1].parse().unwrap_or(0);
            let column = caps[2].parse().unwrap_or(0);
            let message = LOCATION.replace(&raw, "").into_owned();
            ParseError::at(message, line, column)
        }
        None => ParseError::new(raw),
    }
}

fn unsupported(what: impl std::fmt::Display) -> ParseError {
    ParseError::new(format!("unsupported {}", what))
}

fn object_name(name: &sp::ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn convert_statement(stmt: sp::Statement) -> ParseResult<Statement> {
    match stmt {
        sp::Statement::Query(q) => convert_query(*q),
        sp::Statement::Insert(insert) => convert_insert(insert),
        sp::Statement::Update {
            table,
            assignments,
            from,
            selection,
            returning,
            ..
        } => {
            if from.is_some() {
                return Err(unsupported("UPDATE ... FROM"));
            }
            if returning.is_some() {
                return Err(unsupported("RETURNING"));
            }
            convert_update(table, assignments, selection)
        }
        sp::Statement::Delete(delete) => convert_delete(delete),
        other => Err(unsupported(format!("statement: {}", other))),
    }
}

fn convert_query(query: sp::Query) -> ParseResult<Statement> {
    if query.with.is_some() {
        return Err(unsupported("WITH clause"));
    }
    if query.fetch.is_some() {
        return Err(unsupported("FETCH clause"));
    }
    let mut select = match *query.body {
        sp::SetExpr::Select(select) => convert_select(*select)?,
        sp::SetExpr::Query(inner) => return convert_query(*inner),
        other => return Err(unsupported(format!("query body: {}", other))),
    };

    if let Some(order_by) = query.order_by {
        select.order_by = order_by
            .exprs
            .into_iter()
            .map(|o| {
                Ok(OrderBy {
                    expr: convert_expr(o.expr)?,
                    asc: o.asc.unwrap_or(true),
                })
            })
            .collect::<ParseResult<Vec<_>>>()?;
    }
    select.limit = query.limit.map(row_count).transpose()?;
    select.offset = query.offset.map(|o| row_count(o.value)).transpose()?;
    Ok(Statement::Select(select))
}

fn row_count(expr: sp::Expr) -> ParseResult<u64> {
    match expr {
        sp::Expr::Value(sp::Value::Number(n, _)) => n
            .parse()
            .map_err(|_| ParseError::new(format!("invalid row count: {}", n))),
        other => Err(unsupported(format!("row count expression: {}", other))),
    }
}

fn convert_select(select: sp::Select) -> ParseResult<SelectStmt> {
    let distinct = match select.distinct {
        None => false,
        Some(sp::Distinct::Distinct) => true,
        Some(sp::Distinct::On(_)) => return Err(unsupported("DISTINCT ON")),
    };
    if select.top.is_some() {
        return Err(unsupported("TOP"));
    }
    match &select.group_by {
        sp::GroupByExpr::Expressions(exprs, _) if exprs.is_empty() => {}
        _ => return Err(unsupported("GROUP BY")),
    }
    if select.having.is_some() {
        return Err(unsupported("HAVING"));
    }

    let projection = select
        .projection
        .into_iter()
        .map(convert_select_item)
        .collect::<ParseResult<Vec<_>>>()?;

    let mut from = select.from.into_iter();
    let table = match (from.next(), from.next()) {
        (None, _) => None,
        (Some(twj), None) => Some(convert_single_table(twj)?),
        (Some(_), Some(_)) => return Err(unsupported("multiple FROM tables")),
    };

    Ok(SelectStmt {
        distinct,
        projection,
        from: table,
        filter: select.selection.map(convert_expr).transpose()?,
        order_by: Vec::new(),
        limit: None,
        offset: None,
    })
}

fn convert_single_table(twj: sp::TableWithJoins) -> ParseResult<TableName> {
    if !twj.joins.is_empty() {
        return Err(unsupported("JOIN"));
    }
    match twj.relation {
        sp::TableFactor::Table { name, alias, .. } => Ok(TableName {
            name: object_name(&name),
            alias: alias.map(|a| a.name.value),
        }),
        other => Err(unsupported(format!("table reference: {}", other))),
    }
}

fn convert_select_item(item: sp::SelectItem) -> ParseResult<SelectItem> {
    match item {
        sp::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
            expr: convert_expr(expr)?,
            alias: None,
        }),
        sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
            expr: convert_expr(expr)?,
            alias: Some(alias.value),
        }),
        sp::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
        sp::SelectItem::QualifiedWildcard(name, _) => Ok(SelectItem::Expr {
            expr: Expr::Column(format!("{}.*", object_name(&name))),
            alias: None,
        }),
    }
}

fn convert_insert(insert: sp::Insert) -> ParseResult<Statement> {
    if insert.returning.is_some() {
        return Err(unsupported("RETURNING"));
    }
    if insert.on.is_some() {
        return Err(unsupported("ON CONFLICT"));
    }
    let rows = match insert.source {
        Some(source) => match *source.body {
            sp::SetExpr::Values(values) => values
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(convert_expr).collect())
                .collect::<ParseResult<Vec<Vec<_>>>>()?,
            _ => return Err(unsupported("INSERT ... SELECT")),
        },
        None => return Err(unsupported("INSERT without VALUES")),
    };
    Ok(Statement::Insert(InsertStmt {
        table: object_name(&insert.table_name),
        columns: insert.columns.into_iter().map(|c| c.value).collect(),
        rows,
    }))
}

fn convert_update(
    table: sp::TableWithJoins,
    assignments: Vec<sp::Assignment>,
    selection: Option<sp::Expr>,
) -> ParseResult<Statement> {
    let table = convert_single_table(table)?;
    let assignments = assignments
        .into_iter()
        .map(|a| {
            let column = match &a.target {
                sp::AssignmentTarget::ColumnName(name) => object_name(name),
                sp::AssignmentTarget::Tuple(_) => return Err(unsupported("tuple assignment")),
            };
            Ok(Assignment {
                column,
                value: convert_expr(a.value)?,
            })
        })
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Statement::Update(UpdateStmt {
        table,
        assignments,
        filter: selection.map(convert_expr).transpose()?,
    }))
}

fn convert_delete(delete: sp::Delete) -> ParseResult<Statement> {
    if delete.using.is_some() || !delete.tables.is_empty() {
        return Err(unsupported("multi-table DELETE"));
    }
    if delete.returning.is_some() {
        return Err(unsupported("RETURNING"));
    }
    let tables = match delete.from {
        sp::FromTable::WithFromKeyword(tables) | sp::FromTable::WithoutKeyword(tables) => tables,
    };
    let mut tables = tables.into_iter();
    let table = match (tables.next(), tables.next()) {
        (Some(twj), None) => convert_single_table(twj)?,
        (None, _) => return Err(ParseError::new("DELETE without table")),
        (Some(_), Some(_)) => return Err(unsupported("multi-table DELETE")),
    };
    Ok(Statement::Delete(DeleteStmt {
        table,
        filter: delete.selection.map(convert_expr).transpose()?,
    }))
}

fn boxed(expr: sp::Expr) -> ParseResult<Box<Expr>> {
    convert_expr(expr).map(Box::new)
}

fn convert_expr(expr: sp::Expr) -> ParseResult<Expr> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(Expr::Column(ident.value)),
        sp::Expr::CompoundIdentifier(parts) => Ok(Expr::Column(
            parts
                .into_iter()
                .map(|p| p.value)
                .collect::<Vec<_>>()
                .join("."),
        )),
        sp::Expr::Value(val) => convert_value(val),
        sp::Expr::BinaryOp { left, op, right } => Ok(Expr::Binary {
            left: boxed(*left)?,
            op: convert_binary_op(op)?,
            right: boxed(*right)?,
        }),
        sp::Expr::UnaryOp { op, expr } => Ok(Expr::Unary {
            op: convert_unary_op(op)?,
            expr: boxed(*expr)?,
        }),
        sp::Expr::Function(func) => convert_function(func),
        sp::Expr::Cast {
            expr, data_type, ..
        } => {
            let type_name = data_type.to_string();
            let ty = FieldType::from_sql_name(&type_name)
                .ok_or_else(|| unsupported(format!("cast to {}", type_name)))?;
            Ok(Expr::Cast {
                expr: boxed(*expr)?,
                ty,
            })
        }
        sp::Expr::IsNull(expr) => Ok(Expr::IsNull {
            expr: boxed(*expr)?,
            negated: false,
        }),
        sp::Expr::IsNotNull(expr) => Ok(Expr::IsNull {
            expr: boxed(*expr)?,
            negated: true,
        }),
        sp::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::InList {
            expr: boxed(*expr)?,
            list: list
                .into_iter()
                .map(convert_expr)
                .collect::<ParseResult<Vec<_>>>()?,
            negated,
        }),
        sp::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Expr::Between {
            expr: boxed(*expr)?,
            low: boxed(*low)?,
            high: boxed(*high)?,
            negated,
        }),
        sp::Expr::Like {
            negated,
            expr,
            pattern,
            escape_char,
            ..
        } => {
            if escape_char.is_some() {
                return Err(unsupported("LIKE ... ESCAPE"));
            }
            Ok(Expr::Binary {
                left: boxed(*expr)?,
                op: if negated {
                    BinaryOperator::NotLike
                } else {
                    BinaryOperator::Like
                },
                right: boxed(*pattern)?,
            })
        }
        sp::Expr::Nested(expr) => Ok(Expr::Nested(boxed(*expr)?)),
        sp::Expr::Subquery(_) | sp::Expr::InSubquery { .. } | sp::Expr::Exists { .. } => {
            Err(unsupported("subquery"))
        }
        other => Err(unsupported(format!("expression: {}", other))),
    }
}

fn convert_value(val: sp::Value) -> ParseResult<Expr> {
    let lit = match val {
        sp::Value::Null => Literal::Null,
        sp::Value::Boolean(b) => Literal::Bool(b),
        sp::Value::Number(n, _) => match n.parse::<i64>() {
            Ok(i) => Literal::Int(i),
            Err(_) if n.parse::<f64>().is_ok() => Literal::Float(n),
            Err(_) => return Err(ParseError::new(format!("invalid number: {}", n))),
        },
        sp::Value::SingleQuotedString(s) => Literal::Text(s),
        sp::Value::HexStringLiteral(h) => Literal::Hex(h),
        sp::Value::Placeholder(p) => return Ok(Expr::Param(p)),
        other => return Err(unsupported(format!("literal: {}", other))),
    };
    Ok(Expr::Literal(lit))
}

fn convert_binary_op(op: sp::BinaryOperator) -> ParseResult<BinaryOperator> {
    Ok(match op {
        sp::BinaryOperator::Eq => BinaryOperator::Eq,
        sp::BinaryOperator::NotEq => BinaryOperator::NotEq,
        sp::BinaryOperator::Lt => BinaryOperator::Lt,
        sp::BinaryOperator::LtEq => BinaryOperator::LtEq,
        sp::BinaryOperator::Gt => BinaryOperator::Gt,
        sp::BinaryOperator::GtEq => BinaryOperator::GtEq,
        sp::BinaryOperator::And => BinaryOperator::And,
        sp::BinaryOperator::Or => BinaryOperator::Or,
        sp::BinaryOperator::Plus => BinaryOperator::Plus,
        sp::BinaryOperator::Minus => BinaryOperator::Minus,
        sp::BinaryOperator::Multiply => BinaryOperator::Multiply,
        sp::BinaryOperator::Divide => BinaryOperator::Divide,
        sp::BinaryOperator::Modulo => BinaryOperator::Modulo,
        sp::BinaryOperator::StringConcat => BinaryOperator::Concat,
        other => return Err(unsupported(format!("operator {}", other))),
    })
}

fn convert_unary_op(op: sp::UnaryOperator) -> ParseResult<UnaryOperator> {
    match op {
        sp::UnaryOperator::Not => Ok(UnaryOperator::Not),
        sp::UnaryOperator::Minus => Ok(UnaryOperator::Minus),
        sp::UnaryOperator::Plus => Ok(UnaryOperator::Plus),
        other => Err(unsupported(format!("operator {}", other))),
    }
}

fn convert_function(func: sp::Function) -> ParseResult<Expr> {
    if func.over.is_some() {
        return Err(unsupported("window function"));
    }
    if func.filter.is_some() {
        return Err(unsupported("aggregate FILTER"));
    }
    let name = object_name(&func.name);
    let args = match func.args {
        sp::FunctionArguments::None => Vec::new(),
        sp::FunctionArguments::List(list) => {
            if list.duplicate_treatment.is_some() {
                return Err(unsupported("DISTINCT/ALL in function arguments"));
            }
            list.args
                .into_iter()
                .map(|arg| match arg {
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => convert_expr(e),
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) => Ok(Expr::Wildcard),
                    other => Err(unsupported(format!("function argument: {}", other))),
                })
                .collect::<ParseResult<Vec<_>>>()?
        }
        sp::FunctionArguments::Subquery(_) => return Err(unsupported("subquery")),
    };
    Ok(Expr::Function { name, args })
}
