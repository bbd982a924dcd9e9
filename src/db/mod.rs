//! Connection, transaction and statement lifecycle over pooled driver
//! connections.
mod connection;
mod driver_conn;
mod pool;
mod retry;
mod rows;
mod stmt;
mod tx;

pub use connection::Conn;
pub use driver_conn::{DriverConn, DriverConnRef};
pub use pool::{DriverPool, DEFAULT_MAX_IDLE};
pub use retry::{run_once, try_restartable, OpKind};
pub use rows::{Row, Rows};
pub use stmt::Stmt;
pub use tx::{Tx, TxAutoCloser};
