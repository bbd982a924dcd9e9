//! Pooled SQL client with an AST cache and translation of portable SQL
//! into engine dialects.
//!
//! ```no_run
//! use dba::{global, Value};
//!
//! # fn main() -> dba::Result<()> {
//! let g = global();
//! g.initialize();
//! let conn = g.open_str("sqlite:::/tmp/app.db:")?;
//! let n = conn.scalar("SELECT COUNT(*) FROM items WHERE id > ?", &[Value::Int(10)])?;
//! println!("{}", n);
//! g.close(&conn);
//! g.shutdown();
//! # Ok(())
//! # }
//! ```
pub mod ast;
pub mod config;
pub mod connstr;
pub mod db;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod global;
pub mod schema;
pub mod sqlbuilder;
pub mod translate;
pub mod value;

pub use config::Config;
pub use connstr::{CertSource, ConnDesc, TlsMaterial};
pub use db::{Conn, Row, Rows, Stmt, Tx, TxAutoCloser};
pub use dialect::Dialect;
pub use error::{Error, ErrorCategory, ParseError, Result};
pub use global::{global, Global};
pub use schema::{Field, FieldType, Schema, Table};
pub use translate::Translator;
pub use value::Value;
