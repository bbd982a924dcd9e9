//! Driver capability interface.
//!
//! A [`Driver`] turns a [`ConnDesc`] into physical connections ([`RawConn`]).
//! Everything above this module talks to engines only through these traits;
//! the built-in drivers are SQLite and, with the `postgres` feature,
//! PostgreSQL.
use std::any::Any;
use std::collections::VecDeque;

use crate::connstr::ConnDesc;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::schema::{SchemaReader, SchemaWriter};
use crate::value::Value;

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub trait Driver: Send + Sync {
    /// Registry key, matched against [`ConnDesc::driver`].
    fn name(&self) -> &str;

    /// Dialect used when a connection does not report its own.
    fn default_dialect(&self) -> &'static dyn Dialect;

    fn connect(&self, desc: &ConnDesc) -> Result<Box<dyn RawConn>>;

    fn schema_reader(&self) -> Option<&dyn SchemaReader> {
        None
    }

    fn schema_writer(&self) -> Option<&dyn SchemaWriter> {
        None
    }
}

/// One physical session. Calls are serialized by the owning
/// `DriverConn`; implementations need not be `Sync`.
///
/// A dropped session is reported as [`crate::Error::ConnectionLost`] so the
/// retry layer can recognise it.
pub trait RawConn: Send {
    /// Dialect discovered from the server, if the driver can tell.
    fn dialect(&self) -> Option<&'static dyn Dialect> {
        None
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn RawStmt>>;

    /// Run a statement prepared on this session; returns affected rows.
    fn execute(&mut self, stmt: &dyn RawStmt, params: &[Value]) -> Result<u64>;

    fn query(&mut self, stmt: &dyn RawStmt, params: &[Value]) -> Result<Box<dyn RawRows>>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub trait RawStmt: Send + Sync {
    fn sql(&self) -> &str;

    /// Number of bind parameters the statement expects.
    fn param_count(&self) -> usize;

    /// For drivers to recover their concrete statement type.
    fn as_any(&self) -> &dyn Any;
}

pub trait RawRows: Send {
    fn columns(&self) -> &[String];

    fn next_row(&mut self) -> Result<Option<Vec<Value>>>;
}

/// Fully materialized result set. Both built-in drivers buffer rows.
#[derive(Debug, Default)]
pub struct BufferedRows {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

impl BufferedRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }
}

impl RawRows for BufferedRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }
}
