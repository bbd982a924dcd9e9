//! Process-wide registry of drivers and logical connections.
//!
//! [`Global`] is an ordinary value so tests and embedders can own one;
//! [`global()`] hands out a lazily created process instance.
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::ast::{AstCache, HashKeys};
use crate::config::Config;
use crate::connstr::ConnDesc;
use crate::db::Conn;
use crate::driver::Driver;
use crate::error::{Error, Result};

#[derive(Default)]
struct Registry {
    init_count: usize,
    cache: Option<Arc<AstCache>>,
    drivers: HashMap<String, Arc<dyn Driver>>,
    conns: HashMap<ConnDesc, Conn>,
}

pub struct Global {
    config: Config,
    registry: Mutex<Registry>,
}

impl Global {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Counted. The first call creates the AST cache with fresh random
    /// fingerprint keys and registers the built-in drivers.
    pub fn initialize(&self) {
        let mut reg = self.registry.lock();
        reg.init_count += 1;
        if reg.init_count > 1 {
            return;
        }
        reg.cache = Some(Arc::new(AstCache::with_keys(
            HashKeys::random(),
            self.config.ast_cache.max_entries,
        )));
        for driver in builtin_drivers() {
            reg.drivers.insert(driver.name().to_string(), driver);
        }
        info!(drivers = reg.drivers.len(), "database layer initialized");
    }

    /// Balances one [`Global::initialize`]. The last one closes every
    /// logical connection and forgets all drivers.
    pub fn shutdown(&self) {
        let mut reg = self.registry.lock();
        match reg.init_count {
            0 => return,
            1 => {}
            _ => {
                reg.init_count -= 1;
                return;
            }
        }
        reg.init_count = 0;
        for (_, conn) in reg.conns.drain() {
            conn.shutdown();
        }
        reg.drivers.clear();
        reg.cache = None;
        info!("database layer shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.lock().init_count > 0
    }

    /// Register or replace a driver under its [`Driver::name`].
    pub fn register_driver(&self, driver: Arc<dyn Driver>) -> Result<()> {
        let mut reg = self.registry.lock();
        if reg.init_count == 0 {
            return Err(Error::NotInitialized);
        }
        debug!(driver = driver.name(), "registered driver");
        reg.drivers.insert(driver.name().to_string(), driver);
        Ok(())
    }

    /// Connections already opened with the driver keep working.
    pub fn unregister_driver(&self, name: &str) -> bool {
        self.registry.lock().drivers.remove(name).is_some()
    }

    pub fn cache(&self) -> Result<Arc<AstCache>> {
        self.registry.lock().cache.clone().ok_or(Error::NotInitialized)
    }

    /// Open, or reuse, the logical connection for `desc`. Each successful
    /// call must be balanced by [`Global::close`].
    pub fn open(&self, desc: &ConnDesc) -> Result<Conn> {
        let mut reg = self.registry.lock();
        let cache = reg.cache.clone().ok_or(Error::NotInitialized)?;
        if let Some(conn) = reg.conns.get(desc) {
            let holders = conn.acquire();
            debug!(desc = %desc, holders, "reusing connection");
            return Ok(conn.clone());
        }

        let driver = reg
            .drivers
            .get(&desc.driver)
            .cloned()
            .ok_or_else(|| Error::DriverUnknown(desc.driver.clone()))?;
        // Connecting under the registry lock keeps concurrent first opens
        // from creating duplicates.
        let conn = Conn::open(driver, desc.clone(), cache, self.config.pool.max_idle)?;
        conn.acquire();
        reg.conns.insert(desc.clone(), conn.clone());
        Ok(conn)
    }

    pub fn open_str(&self, desc: &str) -> Result<Conn> {
        self.open(&ConnDesc::parse(desc)?)
    }

    /// Balance one [`Global::open`]. The last close shuts the connection's
    /// pool down; physical connections still in use close on release.
    pub fn close(&self, conn: &Conn) {
        let mut reg = self.registry.lock();
        let registered = reg
            .conns
            .get(conn.desc())
            .is_some_and(|c| c.same_as(conn));
        if !registered {
            warn!(desc = %conn.desc(), "close of a connection that is not open");
            return;
        }
        if conn.release() == 0 {
            reg.conns.remove(conn.desc());
            drop(reg);
            conn.shutdown();
        }
    }

    /// Logical connections currently open.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().conns.len()
    }
}

impl Drop for Global {
    fn drop(&mut self) {
        let reg = self.registry.get_mut();
        for (_, conn) in reg.conns.drain() {
            conn.shutdown();
        }
    }
}

fn builtin_drivers() -> Vec<Arc<dyn Driver>> {
    let mut drivers: Vec<Arc<dyn Driver>> = vec![Arc::new(crate::driver::sqlite::SqliteDriver)];
    #[cfg(feature = "postgres")]
    drivers.push(Arc::new(crate::driver::postgres::PostgresDriver));
    drivers
}

static GLOBAL: OnceLock<Global> = OnceLock::new();

/// The process-wide instance, configured from [`Config::load_default`].
/// Callers still pair [`Global::initialize`] with [`Global::shutdown`].
pub fn global() -> &'static Global {
    GLOBAL.get_or_init(|| {
        let config = Config::load_default().unwrap_or_else(|e| {
            warn!("ignoring unreadable config: {}", e);
            Config::default()
        });
        Global::new(config)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{MockDriver, MockStats};
    use crate::schema::{Field, FieldType, Table};
    use crate::value::Value;
    use std::sync::Barrier;

    fn setup() -> (Global, Arc<MockDriver>) {
        let global = Global::new(Config::default());
        global.initialize();
        let driver = MockDriver::new();
        global.register_driver(driver.clone()).unwrap();
        (global, driver)
    }

    #[test]
    fn test_initialize_is_counted() {
        let global = Global::new(Config::default());
        assert!(matches!(
            global.open(&MockDriver::desc("a")),
            Err(Error::NotInitialized)
        ));
        global.initialize();
        global.initialize();
        global.shutdown();
        assert!(global.is_initialized());
        assert!(global.cache().is_ok());
        global.shutdown();
        assert!(!global.is_initialized());
        assert!(matches!(global.cache(), Err(Error::NotInitialized)));
        global.shutdown();
        assert!(!global.is_initialized());
    }

    #[test]
    fn test_unknown_driver() {
        let (global, _) = setup();
        let desc = ConnDesc::new("oracle", "h", 1, "d", "u", "p");
        assert!(matches!(global.open(&desc), Err(Error::DriverUnknown(name)) if name == "oracle"));
        assert!(global.unregister_driver("mock"));
        assert!(global.open(&MockDriver::desc("a")).is_err());
    }

    #[test]
    fn test_open_reuses_logical_connection() {
        let (global, driver) = setup();
        let a = global.open(&MockDriver::desc("app")).unwrap();
        let b = global.open(&MockDriver::desc("app")).unwrap();
        assert!(a.same_as(&b));
        assert_eq!(a.ref_count(), 2);
        assert_eq!(global.connection_count(), 1);
        assert_eq!(MockStats::get(&driver.stats.connects), 1);

        let other = global.open(&MockDriver::desc("other")).unwrap();
        assert!(!other.same_as(&a));
        assert_eq!(global.connection_count(), 2);
    }

    #[test]
    fn test_close_waits_for_last_holder() {
        let (global, driver) = setup();
        let a = global.open(&MockDriver::desc("app")).unwrap();
        let b = global.open(&MockDriver::desc("app")).unwrap();
        assert_eq!(a.scalar("SELECT 1", &[]).unwrap(), Value::Int(1));
        assert_eq!(b.scalar("SELECT 1", &[]).unwrap(), Value::Int(1));

        global.close(&a);
        assert_eq!(MockStats::get(&driver.stats.closes), 0);
        assert_eq!(global.connection_count(), 1);
        assert_eq!(b.scalar("SELECT 1", &[]).unwrap(), Value::Int(1));

        global.close(&b);
        assert_eq!(MockStats::get(&driver.stats.closes), 1);
        assert_eq!(global.connection_count(), 0);

        // Extra closes are ignored.
        global.close(&b);
        assert_eq!(MockStats::get(&driver.stats.closes), 1);
    }

    #[test]
    fn test_close_defers_in_flight_connections() {
        let (global, driver) = setup();
        let conn = global.open(&MockDriver::desc("app")).unwrap();
        let rows = conn.query("SELECT many", &[]).unwrap();
        global.close(&conn);
        assert_eq!(MockStats::get(&driver.stats.closes), 0);
        drop(rows);
        assert_eq!(MockStats::get(&driver.stats.closes), 1);
        assert_eq!(conn.pool().open_count(), 0);
    }

    #[test]
    fn test_concurrent_first_open() {
        let (global, driver) = setup();
        let barrier = Barrier::new(8);
        let conns: Vec<Conn> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        global.open(&MockDriver::desc("app")).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(conns.iter().all(|c| c.same_as(&conns[0])));
        assert_eq!(conns[0].ref_count(), 8);
        assert_eq!(MockStats::get(&driver.stats.connects), 1);
    }

    #[test]
    fn test_prepare_drop_retried_exec_drop_not() {
        let (global, driver) = setup();
        let conn = global.open(&MockDriver::desc("app")).unwrap();

        conn.inject_fault(0).unwrap();
        let stmt = conn.prepare("DELETE FROM t WHERE id = ?").unwrap();
        assert_eq!(stmt.exec(&[Value::Int(3)]).unwrap(), 1);
        assert_eq!(MockStats::get(&driver.stats.connects), 2);
        drop(stmt);

        conn.inject_fault(1).unwrap();
        assert!(matches!(
            conn.exec("DELETE FROM t WHERE id = ?", &[Value::Int(4)]),
            Err(Error::BadConnection)
        ));
        assert_eq!(MockStats::get(&driver.stats.executes), 1);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let (global, driver) = setup();
        let conn = global.open(&MockDriver::desc("app")).unwrap();
        global.open(&MockDriver::desc("other")).unwrap();
        global.shutdown();
        assert_eq!(global.connection_count(), 0);
        assert_eq!(MockStats::get(&driver.stats.closes), 2);
        assert!(conn.pool().is_shut_down());
    }

    #[test]
    fn test_sqlite_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let global = Global::new(Config::default());
        global.initialize();
        let conn = global
            .open_str(&format!("sqlite:::{}:", path.display()))
            .unwrap();
        assert_eq!(conn.dialect().name(), "sqlite");

        let table = Table::new(
            "items",
            vec![
                Field::new("id", FieldType::Int64),
                Field::new("label", FieldType::Text),
            ],
        );
        conn.create_table(&table).unwrap();
        assert_eq!(
            conn.exec(
                "INSERT INTO items (id, label) VALUES (?, ?), (?, ?)",
                &[
                    Value::Int(1),
                    Value::Text("one".into()),
                    Value::Int(2),
                    Value::Text("two".into())
                ]
            )
            .unwrap(),
            2
        );

        let labels: Vec<Value> = conn
            .query("SELECT label FROM items ORDER BY id", &[])
            .unwrap()
            .map(|r| r.unwrap().into_values().remove(0))
            .collect();
        assert_eq!(labels, vec![Value::Text("one".into()), Value::Text("two".into())]);

        let tx = conn.begin().unwrap();
        tx.exec("DELETE FROM items", &[]).unwrap();
        drop(tx);
        assert_eq!(
            conn.scalar("SELECT COUNT(*) FROM items", &[]).unwrap(),
            Value::Int(2)
        );

        let schema = conn.read_schema().unwrap();
        let items = schema.table("items").unwrap();
        assert_eq!(items.fields.len(), 2);
        assert_eq!(items.field("label").unwrap().ty, FieldType::Text);

        global.close(&conn);
        global.shutdown();
    }
}
