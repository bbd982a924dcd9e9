use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::driver_conn::{DriverConn, DriverConnRef};
use crate::connstr::ConnDesc;
use crate::driver::Driver;
use crate::error::Result;

pub const DEFAULT_MAX_IDLE: usize = 8;

/// Physical connections for one logical connection.
///
/// Idle connections are reused most-recently-returned first. The idle lock
/// is never held while the driver connects.
pub struct DriverPool {
    driver: Arc<dyn Driver>,
    desc: ConnDesc,
    max_idle: usize,
    idle: Mutex<Vec<Arc<DriverConn>>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    open: AtomicUsize,
}

impl DriverPool {
    pub fn new(driver: Arc<dyn Driver>, desc: ConnDesc, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            driver,
            desc,
            max_idle,
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            open: AtomicUsize::new(0),
        })
    }

    pub fn desc(&self) -> &ConnDesc {
        &self.desc
    }

    /// Reuse an idle connection or open a new one.
    pub fn checkout(self: &Arc<Self>) -> Result<DriverConnRef> {
        let reused = self.idle.lock().pop();
        match reused {
            Some(conn) => Ok(DriverConnRef::new(conn, self.clone())),
            None => self.open_fresh(),
        }
    }

    /// Always opens a new physical connection.
    pub fn open_fresh(self: &Arc<Self>) -> Result<DriverConnRef> {
        let raw = self.driver.connect(&self.desc)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        debug!(conn = id, desc = %self.desc, "opened driver connection");
        Ok(DriverConnRef::new(
            Arc::new(DriverConn::new(id, raw)),
            self.clone(),
        ))
    }

    /// Called when the last reference to `conn` is released.
    pub(crate) fn check_in(&self, conn: Arc<DriverConn>) {
        if conn.is_closed() {
            return;
        }
        if conn.is_broken() || self.closed.load(Ordering::SeqCst) {
            self.retire(&conn);
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.max_idle {
            drop(idle);
            self.retire(&conn);
        } else {
            idle.push(conn);
        }
    }

    fn retire(&self, conn: &DriverConn) {
        conn.close();
        self.open.fetch_sub(1, Ordering::SeqCst);
    }

    /// Close idle connections now; in-flight ones close on final release.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let idle = std::mem::take(&mut *self.idle.lock());
        for conn in &idle {
            self.retire(conn);
        }
        debug!(desc = %self.desc, closed = idle.len(), "driver pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Physical connections currently open, idle or in use.
    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{MockDriver, MockStats};

    #[test]
    fn test_checkout_reuses_lifo() {
        let driver = MockDriver::new();
        let pool = DriverPool::new(driver.clone(), MockDriver::desc("a"), 4);
        let first = pool.checkout().unwrap();
        let second = pool.checkout().unwrap();
        let (id1, id2) = (first.conn().id(), second.conn().id());
        assert_ne!(id1, id2);
        drop(first);
        drop(second);
        assert_eq!(pool.idle_count(), 2);

        assert_eq!(pool.checkout().unwrap().conn().id(), id2);
        assert_eq!(MockStats::get(&driver.stats.connects), 2);
    }

    #[test]
    fn test_clone_keeps_connection_out() {
        let pool = DriverPool::new(MockDriver::new(), MockDriver::desc("a"), 4);
        let r = pool.checkout().unwrap();
        let r2 = r.clone();
        assert_eq!(r.conn().ref_count(), 2);
        drop(r);
        assert_eq!(pool.idle_count(), 0);
        drop(r2);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_broken_and_overflow_are_closed() {
        let driver = MockDriver::new();
        let pool = DriverPool::new(driver.clone(), MockDriver::desc("a"), 1);
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        let c = pool.checkout().unwrap();
        c.conn().mark_broken();
        drop(c);
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.open_count(), 1);
        assert_eq!(MockStats::get(&driver.stats.closes), 2);
    }

    #[test]
    fn test_shutdown_defers_in_flight() {
        let driver = MockDriver::new();
        let pool = DriverPool::new(driver.clone(), MockDriver::desc("a"), 4);
        let busy = pool.checkout().unwrap();
        drop(pool.checkout().unwrap());
        pool.shutdown();
        assert_eq!(MockStats::get(&driver.stats.closes), 1);
        drop(busy);
        assert_eq!(MockStats::get(&driver.stats.closes), 2);
        assert_eq!(pool.open_count(), 0);
    }
}
