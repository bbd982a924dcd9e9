use std::sync::Arc;

use super::driver_conn::DriverConnRef;
use super::tx::TxState;
use crate::driver::RawRows;
use crate::error::{Error, Result};
use crate::value::Value;

/// One result row. Column names are shared with the originating [`Rows`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Case-insensitive lookup by column name.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Result-set iterator. Holds its driver connection until drained, closed
/// or dropped.
pub struct Rows {
    columns: Arc<[String]>,
    source: Option<(Box<dyn RawRows>, DriverConnRef)>,
    tx: Option<Arc<TxState>>,
}

impl Rows {
    pub(crate) fn new(raw: Box<dyn RawRows>, conn: DriverConnRef, tx: Option<Arc<TxState>>) -> Self {
        Self {
            columns: raw.columns().into(),
            source: Some((raw, conn)),
            tx,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Release the driver connection without reading further.
    pub fn close(mut self) {
        self.source = None;
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let (raw, conn) = self.source.as_mut()?;
        match raw.next_row() {
            Ok(Some(values)) => Some(Ok(Row::new(self.columns.clone(), values))),
            Ok(None) => {
                self.source = None;
                None
            }
            Err(e) => {
                let err = if e.is_connection_lost() {
                    conn.conn().mark_broken();
                    if let Some(tx) = &self.tx {
                        tx.abort();
                    }
                    Error::BadConnection
                } else {
                    e
                };
                self.source = None;
                Some(Err(err))
            }
        }
    }
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns)
            .field("open", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::DriverPool;
    use crate::driver::testing::MockDriver;
    use crate::driver::BufferedRows;

    fn rows(pool: &Arc<DriverPool>, n: i64) -> Rows {
        let raw = BufferedRows::new(
            vec!["id".into(), "Name".into()],
            (0..n)
                .map(|i| vec![Value::Int(i), Value::Text(format!("r{}", i))])
                .collect(),
        );
        Rows::new(Box::new(raw), pool.checkout().unwrap(), None)
    }

    #[test]
    fn test_drain_releases_connection() {
        let pool = DriverPool::new(MockDriver::new(), MockDriver::desc("a"), 4);
        let mut rs = rows(&pool, 2);
        assert_eq!(rs.columns(), &["id", "Name"]);
        let first = rs.next().unwrap().unwrap();
        assert_eq!(first.get(0), Some(&Value::Int(0)));
        assert_eq!(first.get_named("name"), Some(&Value::Text("r0".into())));
        assert_eq!(pool.idle_count(), 0);

        assert!(rs.next().unwrap().is_ok());
        assert!(rs.next().is_none());
        assert!(rs.is_closed());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_close_and_drop_release_connection() {
        let pool = DriverPool::new(MockDriver::new(), MockDriver::desc("a"), 4);
        rows(&pool, 3).close();
        assert_eq!(pool.idle_count(), 1);

        let rs = rows(&pool, 3);
        assert_eq!(pool.idle_count(), 0);
        drop(rs);
        assert_eq!(pool.idle_count(), 1);
    }
}
