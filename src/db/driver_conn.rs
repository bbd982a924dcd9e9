use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
#[cfg(any(test, feature = "fault-injection"))]
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::pool::DriverPool;
use crate::driver::RawConn;
use crate::error::{Error, Result};

/// One physical connection owned by a [`DriverPool`].
pub struct DriverConn {
    id: u64,
    raw: Mutex<Box<dyn RawConn>>,
    refs: AtomicUsize,
    tx_busy: AtomicBool,
    broken: AtomicBool,
    closed: AtomicBool,
    /// Operations left before a simulated drop; negative when disarmed.
    #[cfg(any(test, feature = "fault-injection"))]
    fault_after: AtomicI64,
}

impl DriverConn {
    pub(crate) fn new(id: u64, raw: Box<dyn RawConn>) -> Self {
        Self {
            id,
            raw: Mutex::new(raw),
            refs: AtomicUsize::new(0),
            tx_busy: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            #[cfg(any(test, feature = "fault-injection"))]
            fault_after: AtomicI64::new(-1),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Outstanding `Rows`/`Stmt`/`Tx` references.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub fn is_tx_busy(&self) -> bool {
        self.tx_busy.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            warn!(conn = self.id, "driver connection marked broken");
        }
    }

    /// Claim the transaction slot.
    pub(crate) fn enter_tx(&self) -> Result<()> {
        if self.tx_busy.swap(true, Ordering::SeqCst) {
            return Err(Error::TxBusy);
        }
        Ok(())
    }

    pub(crate) fn leave_tx(&self) {
        self.tx_busy.store(false, Ordering::SeqCst);
    }

    /// Arrange for the operation after the next `after_ops` ones to fail
    /// with a dropped connection, without reaching the driver.
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn inject_fault(&self, after_ops: u32) {
        self.fault_after.store(i64::from(after_ops), Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "fault-injection"))]
    fn take_fault(&self) -> bool {
        let prev = self
            .fault_after
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n >= 0).then(|| n - 1)
            });
        matches!(prev, Ok(0))
    }

    #[cfg(not(any(test, feature = "fault-injection")))]
    fn take_fault(&self) -> bool {
        false
    }

    /// Run `f` against the physical connection, serialized with every other
    /// user. A broken or closed connection fails without calling the driver.
    pub(crate) fn with_raw<T>(&self, f: impl FnOnce(&mut dyn RawConn) -> Result<T>) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) || self.is_broken() {
            return Err(Error::ConnectionLost(format!(
                "driver connection {} is no longer usable",
                self.id
            )));
        }
        let mut raw = self.raw.lock();
        if self.take_fault() {
            return Err(Error::ConnectionLost(format!(
                "injected fault on driver connection {}",
                self.id
            )));
        }
        f(raw.as_mut())
    }

    /// Physically close. Later calls are no-ops.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.raw.lock().close() {
            warn!(conn = self.id, "close failed: {}", e);
        }
        debug!(conn = self.id, "driver connection closed");
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for DriverConn {
    fn drop(&mut self) {
        self.close();
    }
}

/// Counted reference to a checked-out [`DriverConn`].
///
/// The last reference to go returns the connection to its pool, which
/// closes it instead when it is broken or the pool has shut down.
pub struct DriverConnRef {
    conn: Arc<DriverConn>,
    pool: Arc<DriverPool>,
}

impl DriverConnRef {
    pub(crate) fn new(conn: Arc<DriverConn>, pool: Arc<DriverPool>) -> Self {
        conn.refs.fetch_add(1, Ordering::SeqCst);
        Self { conn, pool }
    }

    pub fn conn(&self) -> &DriverConn {
        &self.conn
    }

    pub(crate) fn pool(&self) -> &Arc<DriverPool> {
        &self.pool
    }

    pub(crate) fn with_raw<T>(&self, f: impl FnOnce(&mut dyn RawConn) -> Result<T>) -> Result<T> {
        self.conn.with_raw(f)
    }

    pub fn same_conn(&self, other: &DriverConnRef) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }
}

impl Clone for DriverConnRef {
    fn clone(&self) -> Self {
        Self::new(self.conn.clone(), self.pool.clone())
    }
}

impl Drop for DriverConnRef {
    fn drop(&mut self) {
        if self.conn.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.pool.check_in(self.conn.clone());
        }
    }
}

impl std::fmt::Debug for DriverConnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConnRef")
            .field("conn", &self.conn.id)
            .field("refs", &self.conn.ref_count())
            .finish()
    }
}
