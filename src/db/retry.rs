//! Recovery from dropped connections.
//!
//! Whether an operation may be replayed on a new connection is decided per
//! operation kind, never per call site. Only operations that cannot have had
//! a server-side effect yet are restartable.
use tracing::warn;

use super::driver_conn::DriverConnRef;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Prepare,
    Begin,
    Exec,
    Query,
    Commit,
    Rollback,
}

impl OpKind {
    pub fn is_restartable(self) -> bool {
        match self {
            OpKind::Prepare | OpKind::Begin => true,
            OpKind::Exec | OpKind::Query | OpKind::Commit | OpKind::Rollback => false,
        }
    }
}

/// Run `op` once. A lost connection is marked broken and reported as
/// [`Error::BadConnection`].
pub fn run_once<T>(conn: &DriverConnRef, op: impl FnOnce(&DriverConnRef) -> Result<T>) -> Result<T> {
    match op(conn) {
        Err(e) if e.is_connection_lost() => {
            conn.conn().mark_broken();
            warn!(conn = conn.conn().id(), "connection lost: {}", e);
            Err(Error::BadConnection)
        }
        other => other,
    }
}

/// Run `op` on `conn`, replaying it once on a freshly opened connection
/// from the same pool if the connection drops and `kind` is restartable.
///
/// Returns the result together with the connection it was obtained on.
pub fn try_restartable<T>(
    kind: OpKind,
    conn: DriverConnRef,
    mut op: impl FnMut(&DriverConnRef) -> Result<T>,
) -> Result<(T, DriverConnRef)> {
    let err = match op(&conn) {
        Ok(value) => return Ok((value, conn)),
        Err(e) => e,
    };
    if !err.is_connection_lost() {
        return Err(err);
    }
    conn.conn().mark_broken();
    if !kind.is_restartable() {
        warn!(?kind, conn = conn.conn().id(), "connection lost, not restartable: {}", err);
        return Err(Error::BadConnection);
    }

    warn!(?kind, conn = conn.conn().id(), "connection lost, retrying once: {}", err);
    let pool = conn.pool().clone();
    drop(conn);
    let fresh = pool.open_fresh()?;
    let value = run_once(&fresh, &mut op)?;
    Ok((value, fresh))
}
