//! Post-parse checks on portable statements.
use std::collections::HashSet;

use super::types::{Expr, Literal, Statement};
use crate::dialect::PortableFunc;
use crate::error::ParseError;

/// Reject malformed binary literals: `X'..'` must hold an even number of
/// hex digits.
pub fn validate_statement(stmt: &Statement) -> Result<(), ParseError> {
    let mut result = Ok(());
    stmt.walk_exprs(&mut |e| {
        if result.is_err() {
            return;
        }
        if let Expr::Literal(Literal::Hex(digits)) = e {
            if digits.len() % 2 != 0 {
                result = Err(ParseError::new(format!(
                    "binary literal X'{}' has an odd number of digits",
                    digits
                )));
            } else if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                result = Err(ParseError::new(format!(
                    "binary literal X'{}' is not hexadecimal",
                    digits
                )));
            }
        }
    });
    result
}

/// Case-insensitive set of function names allowed in user-supplied
/// expressions.
#[derive(Debug, Clone)]
pub struct FunctionWhitelist {
    names: HashSet<String>,
}

const SAFE_FUNCTIONS: &[&str] = &[
    "abs", "avg", "ceil", "coalesce", "count", "floor", "length", "lower", "ltrim", "max",
    "min", "nullif", "replace", "round", "rtrim", "substr", "substring", "sum", "trim",
    "upper",
];

impl FunctionWhitelist {
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
        }
    }

    pub fn allow(mut self, name: &str) -> Self {
        self.names.insert(name.to_ascii_lowercase());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }

    /// Names of functions in `stmt` that are not on the list, in order of
    /// appearance.
    pub fn disallowed(&self, stmt: &Statement) -> Vec<String> {
        let mut out = Vec::new();
        stmt.walk_exprs(&mut |e| {
            if let Expr::Function { name, .. } = e {
                if !self.contains(name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }
}

impl Default for FunctionWhitelist {
    /// Scalar and aggregate basics plus the portable geometry functions.
    fn default() -> Self {
        let mut list = SAFE_FUNCTIONS
            .iter()
            .fold(Self::empty(), |list, name| list.allow(name));
        for func in PortableFunc::ALL {
            list = list.allow(func.name());
        }
        list
    }
}
