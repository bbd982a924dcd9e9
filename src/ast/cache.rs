//! Fingerprint-keyed cache of parsed statements.
//!
//! Entries are reference counted by their checkouts ([`CachedAst`]). A miss
//! parses outside the lock, so two threads may parse the same text
//! concurrently; the loser of the insert race discards its copy. When the
//! map grows past its bound, every unreferenced entry is swept.
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::hash::{Fingerprint, HashKeys};
use super::parser::{self, EXPR_WRAPPER};
use super::types::Statement;
use super::validate::validate_statement;
use crate::error::Result;

pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// An immutable parsed statement shared between checkouts.
pub struct ParsedStatement {
    statement: Statement,
    source: String,
    fingerprint: Fingerprint,
    refs: AtomicUsize,
}

impl ParsedStatement {
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Text the statement was parsed from. For expressions this includes
    /// the wrapping SELECT.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ParsedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedStatement")
            .field("fingerprint", &self.fingerprint)
            .field("source", &self.source)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// A counted checkout of a cache entry. Dropping it releases the count.
#[derive(Debug)]
pub struct CachedAst {
    entry: Arc<ParsedStatement>,
    counted: bool,
}

impl CachedAst {
    fn counted(entry: Arc<ParsedStatement>) -> Self {
        Self {
            entry,
            counted: true,
        }
    }

    /// Statement that could not be cached (fingerprint collision).
    fn detached(entry: Arc<ParsedStatement>) -> Self {
        Self {
            entry,
            counted: false,
        }
    }

    pub fn statement(&self) -> &Statement {
        &self.entry.statement
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.entry.fingerprint
    }

    pub fn ref_count(&self) -> usize {
        self.entry.ref_count()
    }

    pub fn is_cached(&self) -> bool {
        self.counted
    }

    fn release(mut self) -> usize {
        if !self.counted {
            return 0;
        }
        self.counted = false;
        self.entry.refs.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl Deref for CachedAst {
    type Target = Statement;

    fn deref(&self) -> &Statement {
        &self.entry.statement
    }
}

impl Drop for CachedAst {
    fn drop(&mut self) {
        if self.counted {
            self.entry.refs.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub parses: u64,
    /// Misses whose parse result was discarded because another thread
    /// inserted first.
    pub races_lost: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    parses: AtomicU64,
    races_lost: AtomicU64,
    evictions: AtomicU64,
}

pub struct AstCache {
    keys: HashKeys,
    max_entries: usize,
    entries: Mutex<HashMap<Fingerprint, Arc<ParsedStatement>>>,
    counters: Counters,
}

impl AstCache {
    /// Cache with freshly generated fingerprint keys.
    pub fn new(max_entries: usize) -> Self {
        Self::with_keys(HashKeys::random(), max_entries)
    }

    pub fn with_keys(keys: HashKeys, max_entries: usize) -> Self {
        Self {
            keys,
            max_entries,
            entries: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        self.keys.fingerprint(text)
    }

    /// Check out the parsed form of a complete statement.
    pub fn get_ast(&self, text: &str) -> Result<CachedAst> {
        self.checkout(text.to_string(), |source| parser::parse_statement(source))
    }

    /// Check out the parsed form of a bare expression, as
    /// [`Statement::Expr`].
    pub fn get_ast_expression(&self, text: &str) -> Result<CachedAst> {
        let wrapped = format!("{}{}", EXPR_WRAPPER, text);
        self.checkout(wrapped, |_| {
            parser::parse_expression(text).map(Statement::Expr)
        })
    }

    /// Release a checkout and report how many remain on its entry.
    pub fn release_ast(&self, ast: CachedAst) -> usize {
        ast.release()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            parses: self.counters.parses.load(Ordering::Relaxed),
            races_lost: self.counters.races_lost.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    fn checkout(
        &self,
        source: String,
        parse: impl FnOnce(&str) -> std::result::Result<Statement, crate::error::ParseError>,
    ) -> Result<CachedAst> {
        let fingerprint = self.keys.fingerprint(&source);

        let mut collision = false;
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(&fingerprint) {
                if entry.source == source {
                    entry.refs.fetch_add(1, Ordering::AcqRel);
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(CachedAst::counted(Arc::clone(entry)));
                }
                collision = true;
            }
            if entries.len() > self.max_entries {
                self.sweep(&mut entries);
            }
        }

        let statement = parse(&source)?;
        validate_statement(&statement)?;
        self.counters.parses.fetch_add(1, Ordering::Relaxed);

        let parsed = ParsedStatement {
            statement,
            source,
            fingerprint,
            refs: AtomicUsize::new(0),
        };
        if collision {
            warn!(%fingerprint, "AST cache fingerprint collision, statement left uncached");
            return Ok(CachedAst::detached(Arc::new(parsed)));
        }

        let mut entries = self.entries.lock();
        match entries.entry(fingerprint) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.source != parsed.source {
                    warn!(%fingerprint, "AST cache fingerprint collision, statement left uncached");
                    return Ok(CachedAst::detached(Arc::new(parsed)));
                }
                self.counters.races_lost.fetch_add(1, Ordering::Relaxed);
                existing.refs.fetch_add(1, Ordering::AcqRel);
                Ok(CachedAst::counted(Arc::clone(existing)))
            }
            Entry::Vacant(slot) => {
                parsed.refs.store(1, Ordering::Release);
                let entry = Arc::new(parsed);
                slot.insert(Arc::clone(&entry));
                Ok(CachedAst::counted(entry))
            }
        }
    }

    fn sweep(&self, entries: &mut HashMap<Fingerprint, Arc<ParsedStatement>>) {
        let before = entries.len();
        entries.retain(|_, e| e.ref_count() > 0);
        let evicted = before - entries.len();
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(evicted, remaining = entries.len(), "swept AST cache");
    }
}

impl fmt::Debug for AstCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AstCache")
            .field("max_entries", &self.max_entries)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::types::{Expr, Statement};
    use crate::error::Error;
    use std::sync::Barrier;

    #[test]
    fn test_hit_shares_entry() {
        let cache = AstCache::new(10);
        let a = cache.get_ast("SELECT 1").unwrap();
        let b = cache.get_ast("SELECT 1").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.ref_count(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().parses, 1);
    }

    #[test]
    fn test_release_reports_remaining() {
        let cache = AstCache::new(10);
        let a = cache.get_ast("DELETE FROM t").unwrap();
        let b = cache.get_ast("DELETE FROM t").unwrap();
        assert_eq!(cache.release_ast(a), 1);
        assert_eq!(cache.release_ast(b), 0);
        // Entry stays until a sweep.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let cache = AstCache::new(10);
        let a = cache.get_ast("SELECT 1").unwrap();
        {
            let _b = cache.get_ast("SELECT 1").unwrap();
            assert_eq!(a.ref_count(), 2);
        }
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_sweep_evicts_only_unreferenced() {
        let cache = AstCache::new(2);
        let held = cache.get_ast("SELECT 1").unwrap();
        drop(cache.get_ast("SELECT 2").unwrap());
        drop(cache.get_ast("SELECT 3").unwrap());
        assert_eq!(cache.len(), 3);

        // Miss with len > max sweeps before inserting.
        let _d = cache.get_ast("SELECT 4").unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 2);
        assert_eq!(held.ref_count(), 1);
        let again = cache.get_ast("SELECT 1").unwrap();
        assert_eq!(again.ref_count(), 2);
    }

    #[test]
    fn test_sweep_happens_before_parsing() {
        let cache = AstCache::new(1);
        drop(cache.get_ast("SELECT 1").unwrap());
        drop(cache.get_ast("SELECT 2").unwrap());
        assert_eq!(cache.len(), 2);

        // The miss sweeps even though its text never parses.
        assert!(cache.get_ast("SELEC 3").is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_parse_errors_are_not_cached() {
        let cache = AstCache::new(10);
        let err = cache.get_ast("SELEC 1").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_hex_is_a_parse_error() {
        let cache = AstCache::new(10);
        let err = cache
            .get_ast("UPDATE t SET b = X'0' WHERE id = 1")
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_expression_checkout() {
        let cache = AstCache::new(10);
        let ast = cache.get_ast_expression("a > 1").unwrap();
        assert!(matches!(ast.statement(), Statement::Expr(Expr::Binary { .. })));
        // Distinct entry from the same text parsed as a statement.
        assert!(cache.get_ast("a > 1").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expression_error_location() {
        let cache = AstCache::new(10);
        match cache.get_ast_expression("a = = 1") {
            Err(Error::Parse(e)) => assert_eq!(e.column, Some(5)),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_checkout() {
        let cache = AstCache::new(10);
        let barrier = Barrier::new(8);
        let asts: Vec<CachedAst> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_ast("SELECT 1").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.len(), 1);
        assert_eq!(asts[0].ref_count(), 8);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.parses, 8);
        assert_eq!(stats.parses - stats.races_lost, 1);

        let remaining: Vec<usize> = asts.into_iter().map(|a| cache.release_ast(a)).collect();
        assert_eq!(remaining, vec![7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(cache.get_ast("SELECT 1").unwrap().ref_count(), 1);
    }
}
