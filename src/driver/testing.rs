//! Counting in-memory driver for lifecycle tests.
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{BufferedRows, Driver, RawConn, RawRows, RawStmt};
use crate::connstr::ConnDesc;
use crate::dialect::{self, Dialect};
use crate::error::{Error, Result};
use crate::value::Value;

pub(crate) const MOCK_DRIVER: &str = "mock";

#[derive(Debug, Default)]
pub(crate) struct MockStats {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub prepares: AtomicUsize,
    pub executes: AtomicUsize,
    pub queries: AtomicUsize,
}

impl MockStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockDriver {
    pub stats: Arc<MockStats>,
    pub fail_connect: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn desc(database: &str) -> ConnDesc {
        ConnDesc::new(MOCK_DRIVER, "localhost", 1, database, "user", "secret")
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        MOCK_DRIVER
    }

    fn default_dialect(&self) -> &'static dyn Dialect {
        dialect::sqlite()
    }

    fn connect(&self, _desc: &ConnDesc) -> Result<Box<dyn RawConn>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connect_failed("mock refused"));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConn {
            stats: self.stats.clone(),
        }))
    }
}

struct MockConn {
    stats: Arc<MockStats>,
}

struct MockStmt {
    sql: String,
    params: usize,
}

impl RawStmt for MockStmt {
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

impl RawConn for MockConn {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn RawStmt>> {
        self.stats.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStmt {
            sql: sql.to_string(),
            params: count_placeholders(sql),
        }))
    }

    fn execute(&mut self, _stmt: &dyn RawStmt, _params: &[Value]) -> Result<u64> {
        self.stats.executes.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    fn query(&mut self, stmt: &dyn RawStmt, _params: &[Value]) -> Result<Box<dyn RawRows>> {
        self.stats.queries.fetch_add(1, Ordering::SeqCst);
        let rows = if stmt.sql().contains("empty") {
            vec![]
        } else if stmt.sql().contains("many") {
            vec![vec![Value::Int(1)], vec![Value::Int(2)]]
        } else {
            vec![vec![Value::Int(1)]]
        };
        Ok(Box::new(BufferedRows::new(vec!["n".into()], rows)))
    }

    fn begin(&mut self) -> Result<()> {
        self.stats.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Count `?`, `?NNN` and `$NNN` placeholders outside string literals and
/// quoted identifiers. Numbered placeholders count by their highest index.
fn count_placeholders(sql: &str) -> usize {
    let mut anonymous = 0usize;
    let mut highest = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '?' | '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                match digits.parse::<usize>() {
                    Ok(n) => highest = highest.max(n),
                    Err(_) if ch == '?' => anonymous += 1,
                    Err(_) => {}
                }
            }
            _ => {}
        }
    }
    anonymous.max(highest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_placeholders() {
        assert_eq!(count_placeholders("SELECT 1"), 0);
        assert_eq!(count_placeholders("SELECT ? , ?"), 2);
        assert_eq!(count_placeholders("SELECT $1, $2, $1"), 2);
        assert_eq!(count_placeholders("SELECT '?', \"$1\", $1"), 1);
    }
}
