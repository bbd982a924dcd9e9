use std::sync::Arc;

use super::driver_conn::DriverConnRef;
use super::retry::run_once;
use super::rows::Rows;
use super::tx::TxState;
use crate::ast::{CachedAst, Statement};
use crate::dialect::Dialect;
use crate::driver::RawStmt;
use crate::error::{Error, Result};
use crate::value::Value;

/// A prepared statement bound to the driver connection it was prepared on.
pub struct Stmt {
    raw: Box<dyn RawStmt>,
    conn: DriverConnRef,
    dialect: &'static dyn Dialect,
    ast: Option<CachedAst>,
    tx: Option<Arc<TxState>>,
}

impl Stmt {
    pub(crate) fn new(
        raw: Box<dyn RawStmt>,
        conn: DriverConnRef,
        dialect: &'static dyn Dialect,
        ast: Option<CachedAst>,
        tx: Option<Arc<TxState>>,
    ) -> Self {
        Self {
            raw,
            conn,
            dialect,
            ast,
            tx,
        }
    }

    /// Dialect SQL sent to the driver.
    pub fn sql(&self) -> &str {
        self.raw.sql()
    }

    pub fn param_count(&self) -> usize {
        self.raw.param_count()
    }

    /// Portable tree the statement was translated from, if it had markers.
    pub fn ast(&self) -> Option<&Statement> {
        self.ast.as_ref().map(|a| a.statement())
    }

    pub fn driver_conn(&self) -> &DriverConnRef {
        &self.conn
    }

    fn check_params(&self, params: &[Value]) -> Result<()> {
        let expected = self.param_count();
        if params.len() > self.dialect.max_query_params() || params.len() != expected {
            return Err(Error::InvalidNumberOfParameters {
                expected,
                got: params.len(),
            });
        }
        Ok(())
    }

    fn run<T>(&self, op: impl FnOnce(&DriverConnRef) -> Result<T>) -> Result<T> {
        match &self.tx {
            Some(tx) => tx.run(&self.conn, op),
            None => run_once(&self.conn, op),
        }
    }

    /// Execute; returns the affected row count.
    pub fn exec(&self, params: &[Value]) -> Result<u64> {
        self.check_params(params)?;
        self.run(|c| c.with_raw(|raw| raw.execute(self.raw.as_ref(), params)))
    }

    pub fn query(&self, params: &[Value]) -> Result<Rows> {
        self.check_params(params)?;
        let raw_rows = self.run(|c| c.with_raw(|raw| raw.query(self.raw.as_ref(), params)))?;
        Ok(Rows::new(raw_rows, self.conn.clone(), self.tx.clone()))
    }

    /// First column of the only row. Zero or several rows is an error.
    pub fn scalar(&self, params: &[Value]) -> Result<Value> {
        single_value(self.query(params)?)
    }
}

pub(crate) fn single_value(rows: Rows) -> Result<Value> {
    let mut first = None;
    let mut count = 0usize;
    for row in rows {
        let row = row?;
        count += 1;
        if first.is_none() {
            first = Some(row);
        }
    }
    match (count, first) {
        (1, Some(row)) => Ok(row.into_values().into_iter().next().unwrap_or(Value::Null)),
        _ => Err(Error::NotOneResult(count)),
    }
}
