use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use super::connection::Conn;
use super::driver_conn::DriverConnRef;
use super::retry::run_once;
use super::rows::Rows;
use super::stmt::Stmt;
use crate::error::{Error, Result};
use crate::value::Value;

/// Abort flag shared by a transaction and the statements and result sets
/// created inside it.
#[derive(Debug, Default)]
pub(crate) struct TxState {
    aborted: AtomicBool,
}

impl TxState {
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Never retries: a lost connection aborts the transaction.
    pub(crate) fn run<T>(
        &self,
        conn: &DriverConnRef,
        op: impl FnOnce(&DriverConnRef) -> Result<T>,
    ) -> Result<T> {
        if self.is_aborted() {
            return Err(Error::TransactionAborted);
        }
        let result = run_once(conn, op);
        if matches!(result, Err(Error::BadConnection)) {
            self.abort();
        }
        result
    }
}

/// A transaction pinned to one driver connection.
///
/// `commit` and `rollback` consume it. Dropping an active transaction rolls
/// it back.
pub struct Tx {
    owner: Conn,
    conn: DriverConnRef,
    state: Arc<TxState>,
    finished: bool,
}

impl Tx {
    pub(crate) fn new(owner: Conn, conn: DriverConnRef) -> Self {
        Self {
            owner,
            conn,
            state: Arc::new(TxState::default()),
            finished: false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state.is_aborted()
    }

    pub fn driver_conn(&self) -> &DriverConnRef {
        &self.conn
    }

    pub fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let stmt = self.prepare(sql)?;
        stmt.exec(params)
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        let stmt = self.prepare(sql)?;
        stmt.query(params)
    }

    pub fn scalar(&self, sql: &str, params: &[Value]) -> Result<Value> {
        let stmt = self.prepare(sql)?;
        stmt.scalar(params)
    }

    pub fn prepare(&self, sql: &str) -> Result<Stmt> {
        let (text, ast) = self.owner.render(sql)?;
        let raw = self
            .state
            .run(&self.conn, |c| c.with_raw(|raw| raw.prepare(&text)))?;
        Ok(Stmt::new(
            raw,
            self.conn.clone(),
            self.owner.dialect(),
            ast,
            Some(self.state.clone()),
        ))
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let result = self.state.run(&self.conn, |c| c.with_raw(|raw| raw.commit()));
        self.conn.conn().leave_tx();
        result
    }

    /// Roll back. An aborted transaction is already gone server-side.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        let result = if self.is_aborted() {
            Ok(())
        } else {
            self.state.run(&self.conn, |c| c.with_raw(|raw| raw.rollback()))
        };
        self.conn.conn().leave_tx();
        result
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.is_aborted() {
            if let Err(e) = self.state.run(&self.conn, |c| c.with_raw(|raw| raw.rollback())) {
                warn!(conn = self.conn.conn().id(), "implicit rollback failed: {}", e);
            }
        }
        self.conn.conn().leave_tx();
    }
}

/// Scope guard owning a [`Tx`]: rolls back on drop unless committed.
pub struct TxAutoCloser {
    tx: Tx,
}

impl TxAutoCloser {
    pub fn new(tx: Tx) -> Self {
        Self { tx }
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()
    }
}

impl std::ops::Deref for TxAutoCloser {
    type Target = Tx;

    fn deref(&self) -> &Tx {
        &self.tx
    }
}
