use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::driver_conn::DriverConnRef;
use super::pool::DriverPool;
use super::retry::{run_once, try_restartable, OpKind};
use super::rows::Rows;
use super::stmt::{single_value, Stmt};
use super::tx::Tx;
use crate::ast::{AstCache, CachedAst};
use crate::connstr::ConnDesc;
use crate::dialect::Dialect;
use crate::driver::{Driver, RawStmt};
use crate::error::{Error, Result};
use crate::schema::{Schema, Table};
use crate::translate::{self, StatementKind};
use crate::value::Value;

struct ConnInner {
    desc: ConnDesc,
    driver: Arc<dyn Driver>,
    dialect: &'static dyn Dialect,
    pool: Arc<DriverPool>,
    cache: Arc<AstCache>,
    holders: AtomicUsize,
}

/// Logical connection: a pool of physical connections to one database
/// plus its fixed dialect. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

impl Conn {
    /// Build the pool and check one connection out and back in, so a bad
    /// descriptor fails here and the dialect is known.
    pub fn open(
        driver: Arc<dyn Driver>,
        desc: ConnDesc,
        cache: Arc<AstCache>,
        max_idle: usize,
    ) -> Result<Conn> {
        let pool = DriverPool::new(driver.clone(), desc.clone(), max_idle);
        let first = pool.checkout()?;
        let dialect = first
            .with_raw(|raw| Ok(raw.dialect()))?
            .unwrap_or_else(|| driver.default_dialect());
        drop(first);
        info!(desc = %desc, dialect = dialect.name(), "opened connection");
        Ok(Conn {
            inner: Arc::new(ConnInner {
                desc,
                driver,
                dialect,
                pool,
                cache,
                holders: AtomicUsize::new(0),
            }),
        })
    }

    pub fn desc(&self) -> &ConnDesc {
        &self.inner.desc
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.inner.dialect
    }

    pub fn driver_name(&self) -> &str {
        self.inner.driver.name()
    }

    pub fn pool(&self) -> &Arc<DriverPool> {
        &self.inner.pool
    }

    pub fn cache(&self) -> &Arc<AstCache> {
        &self.inner.cache
    }

    /// Outstanding opens of this connection through the registry.
    pub fn ref_count(&self) -> usize {
        self.inner.holders.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire(&self) -> usize {
        self.inner.holders.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn release(&self) -> usize {
        let prev = self
            .inner
            .holders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Shut the pool down. Connections still in use close when released.
    pub(crate) fn shutdown(&self) {
        self.inner.pool.shutdown();
        info!(desc = %self.inner.desc, "closed connection");
    }

    /// Whether both handles refer to the same logical connection.
    pub fn same_as(&self, other: &Conn) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Translate portable SQL into this connection's dialect.
    pub fn translate(&self, sql: &str) -> Result<String> {
        translate::translate(&self.inner.cache, sql, None, None, self.inner.dialect)
    }

    /// Dialect SQL for `sql`, plus the cached tree it came from when the
    /// text went through the AST path. Text without markers is sent as is.
    pub(crate) fn render(&self, sql: &str) -> Result<(String, Option<CachedAst>)> {
        if !translate::has_markers(sql) {
            return Ok((sql.to_string(), None));
        }
        let dialect = self.inner.dialect;
        let kind = translate::detect_statement_type(sql);
        if kind == StatementKind::Select {
            return Ok((translate::bake_builtin_select(sql, dialect)?, None));
        }
        let ast = match kind {
            StatementKind::Expression => self.inner.cache.get_ast_expression(sql)?,
            _ => self.inner.cache.get_ast(sql)?,
        };
        let text = translate::translate_statement(ast.statement(), None, None, dialect)?;
        debug!(dialect = dialect.name(), from = sql, to = %text, "translated");
        Ok((text, Some(ast)))
    }

    fn check_param_limit(&self, count: usize) -> Result<()> {
        let max = self.inner.dialect.max_query_params();
        if count > max {
            return Err(Error::InvalidNumberOfParameters {
                expected: max,
                got: count,
            });
        }
        Ok(())
    }

    /// Check out a connection and prepare `text` on it, retrying once on a
    /// fresh connection if the first one turns out to be dead.
    fn prepare_raw(&self, text: &str) -> Result<(Box<dyn RawStmt>, DriverConnRef)> {
        let conn = self.inner.pool.checkout()?;
        try_restartable(OpKind::Prepare, conn, |c| c.with_raw(|raw| raw.prepare(text)))
    }

    /// Execute a statement; returns the affected row count.
    pub fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check_param_limit(params.len())?;
        let (text, _ast) = self.render(sql)?;
        let (stmt, conn) = self.prepare_raw(&text)?;
        check_param_count(stmt.as_ref(), params)?;
        run_once(&conn, |c| c.with_raw(|raw| raw.execute(stmt.as_ref(), params)))
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        self.check_param_limit(params.len())?;
        let (text, _ast) = self.render(sql)?;
        let (stmt, conn) = self.prepare_raw(&text)?;
        check_param_count(stmt.as_ref(), params)?;
        let raw_rows = run_once(&conn, |c| c.with_raw(|raw| raw.query(stmt.as_ref(), params)))?;
        Ok(Rows::new(raw_rows, conn, None))
    }

    /// First column of the only row; [`Error::NotOneResult`] otherwise.
    pub fn scalar(&self, sql: &str, params: &[Value]) -> Result<Value> {
        single_value(self.query(sql, params)?)
    }

    pub fn prepare(&self, sql: &str) -> Result<Stmt> {
        let (text, ast) = self.render(sql)?;
        let (stmt, conn) = self.prepare_raw(&text)?;
        Ok(Stmt::new(stmt, conn, self.inner.dialect, ast, None))
    }

    pub fn begin(&self) -> Result<Tx> {
        let conn = self.inner.pool.checkout()?;
        let ((), conn) = try_restartable(OpKind::Begin, conn, |c| {
            c.conn().enter_tx()?;
            let result = c.with_raw(|raw| raw.begin());
            if result.is_err() {
                c.conn().leave_tx();
            }
            result
        })?;
        Ok(Tx::new(self.clone(), conn))
    }

    pub fn read_schema(&self) -> Result<Schema> {
        let reader = self.inner.driver.schema_reader().ok_or_else(|| {
            Error::Unsupported(format!("{} cannot read schemas", self.driver_name()))
        })?;
        reader.read_schema(self)
    }

    pub fn create_table(&self, table: &Table) -> Result<()> {
        let writer = self.inner.driver.schema_writer().ok_or_else(|| {
            Error::Unsupported(format!("{} cannot create tables", self.driver_name()))
        })?;
        let sql = writer.create_table_sql(self.inner.dialect, table)?;
        self.exec(&sql, &[])?;
        Ok(())
    }

    /// Arm a simulated drop on the connection the next operation will use.
    #[cfg(any(test, feature = "fault-injection"))]
    pub fn inject_fault(&self, after_ops: u32) -> Result<()> {
        let conn = self.inner.pool.checkout()?;
        conn.conn().inject_fault(after_ops);
        Ok(())
    }
}

fn check_param_count(stmt: &dyn RawStmt, params: &[Value]) -> Result<()> {
    if stmt.param_count() != params.len() {
        return Err(Error::InvalidNumberOfParameters {
            expected: stmt.param_count(),
            got: params.len(),
        });
    }
    Ok(())
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("desc", &self.inner.desc)
            .field("dialect", &self.inner.dialect.name())
            .field("holders", &self.ref_count())
            .finish()
    }
}
