//! LRU parse cache with hit statistics
//!
//! Wraps [`lru::LruCache`] to add the statistics the engine exposes
//! (`gets`, `hits`, hit rate). A process-wide instance backs [`parse`];
//! it can be swapped at boot via [`set_parse_cache`].

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::ast::Ast;
use crate::error::{Error, Result};
use crate::parser::parse_expression;

/// Default capacity of the process-wide parse cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// LRU cache over parsed ASTs.
///
/// - `get` on a hit promotes the entry to most-recent.
/// - `set` updates-and-promotes an existing key, or evicts the single
///   least-recent entry when full before inserting.
/// - Statistics survive `clear` and reset only via `reset_stats`.
pub struct ParseCache {
    entries: LruCache<String, Arc<Ast>>,
    gets: u64,
    hits: u64,
}

impl ParseCache {
    /// Create a cache with the given capacity. Capacities below 1 are
    /// rejected.
    pub fn new(max_size: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(max_size).ok_or(Error::InvalidCacheCapacity(max_size))?;
        Ok(Self {
            entries: LruCache::new(capacity),
            gets: 0,
            hits: 0,
        })
    }

    /// Look up a parsed expression, promoting it on hit.
    pub fn get(&mut self, key: &str) -> Option<Arc<Ast>> {
        self.gets += 1;
        let value = self.entries.get(key).cloned();
        if value.is_some() {
            self.hits += 1;
        }
        value
    }

    /// Insert or update an entry, evicting the least-recent one when full.
    pub fn set(&mut self, key: String, value: Arc<Ast>) {
        self.entries.put(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.entries.cap().get()
    }

    /// Remove all entries. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn gets(&self) -> u64 {
        self.gets
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Hits divided by gets; 0 when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }

    pub fn reset_stats(&mut self) {
        self.gets = 0;
        self.hits = 0;
    }

    /// Iterate entries least-recently-used first.
    pub fn iter_lru_first(&self) -> impl Iterator<Item = (&String, &Arc<Ast>)> {
        self.entries.iter().rev()
    }
}

static PARSE_CACHE: Mutex<Option<ParseCache>> = Mutex::new(None);

/// Parse a FHIRPath expression through the process-wide cache.
pub fn parse(expression: &str) -> Result<Arc<Ast>> {
    let mut guard = PARSE_CACHE.lock().expect("parse cache poisoned");
    let cache = guard.get_or_insert_with(|| {
        ParseCache::new(DEFAULT_CACHE_CAPACITY).expect("default cache capacity is non-zero")
    });

    if let Some(ast) = cache.get(expression) {
        return Ok(ast);
    }

    let ast = Arc::new(parse_expression(expression)?);
    cache.set(expression.to_string(), ast.clone());
    Ok(ast)
}

/// Replace the process-wide parse cache. Intended for boot-time
/// configuration and test isolation.
pub fn set_parse_cache(cache: ParseCache) {
    let mut guard = PARSE_CACHE.lock().expect("parse cache poisoned");
    *guard = Some(cache);
}

/// Run a closure against the process-wide cache (statistics inspection).
pub fn with_parse_cache<T>(f: impl FnOnce(&mut ParseCache) -> T) -> T {
    let mut guard = PARSE_CACHE.lock().expect("parse cache poisoned");
    let cache = guard.get_or_insert_with(|| {
        ParseCache::new(DEFAULT_CACHE_CAPACITY).expect("default cache capacity is non-zero")
    });
    f(cache)
}
