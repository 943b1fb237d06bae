//! Per-module execution cache for incremental builds.
//!
//! Re-running an engine over a mostly unchanged input tree should not redo
//! expensive per-document work. Each module instance gets its own
//! [`ExecutionCache`] namespace (see [`CacheRegistry`]) where it can park
//! results keyed by an explicit string or by a document fingerprint.
//!
//! # Design
//!
//! ## Cache keys
//!
//! Document-derived keys are **content-addressed**: the key is the SHA-256 of
//! the document's source path and content
//! ([`Document::fingerprint`](crate::document::Document::fingerprint)), not
//! its metadata or lineage. An unchanged input file maps to the same key in
//! every build, while any edit produces a new one.
//!
//! Because namespaces are per module, two unrelated modules computing the
//! same fingerprint never see each other's entries. Combinators running
//! child modules share the namespace of the outer module.
//!
//! ## Mark and sweep
//!
//! Every entry carries a *hit* flag. An engine run is one generation:
//!
//! ```text
//! reset_entry_hits()      before the first pipeline: every flag cleared
//! contains / get / set    during the run: the touched entry is marked hit
//! clear_unhit_entries()   after the last pipeline: unmarked entries evicted
//! ```
//!
//! The cache therefore tracks the working set of the current input tree:
//! entries for deleted or edited documents fall out after one build, while
//! everything the build touched survives into the next one.
//!
//! ## Concurrency
//!
//! Modules may process documents on rayon workers, so the map is a
//! [`DashMap`] and hit flags are atomics. A cache is shared as
//! `Arc<dyn ExecutionCache>`.
//!
//! ## Bypassing the cache
//!
//! With caching disabled (`[cache] enabled = false`) every module receives
//! [`NoCache`]: reads always miss and writes are dropped. Callers never need
//! to check which implementation they were handed.

use crate::document::{Document, DocumentError};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::module::ModuleId;

/// A type-erased cached value.
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// Key/value store with hit tracking, scoped to one module.
pub trait ExecutionCache: Send + Sync {
    /// Whether `key` is present. Marks the entry hit.
    fn contains_key(&self, key: &str) -> bool;

    /// Look up `key`. Marks the entry hit.
    fn try_get_value(&self, key: &str) -> Option<CacheValue>;

    /// Insert or overwrite `key`. The entry starts out hit.
    fn set(&self, key: &str, value: CacheValue);

    /// Clear every hit flag; the start of a generation.
    fn reset_entry_hits(&self);

    /// Remove every entry not hit since the last reset. Returns the number removed.
    fn clear_unhit_entries(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup counters for the current generation.
    fn stats(&self) -> CacheStats;
}

impl dyn ExecutionCache + '_ {
    /// Typed lookup. A stored value of another type reads as a miss.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.try_get_value(key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.set(key, Arc::new(value));
    }

    pub fn contains_document(&self, document: &Document) -> Result<bool, DocumentError> {
        Ok(self.contains_key(&document_key(document)?))
    }

    pub fn get_for_document<T: Any + Send + Sync + Clone>(
        &self,
        document: &Document,
    ) -> Result<Option<T>, DocumentError> {
        Ok(self.get(&document_key(document)?))
    }

    pub fn insert_for_document<T: Any + Send + Sync>(
        &self,
        document: &Document,
        value: T,
    ) -> Result<(), DocumentError> {
        self.insert(&document_key(document)?, value);
        Ok(())
    }
}

/// Cache key derived from a document's source and content.
pub fn document_key(document: &Document) -> Result<String, DocumentError> {
    document.fingerprint()
}

/// SHA-256 of arbitrary key material, for modules that build composite keys
/// (e.g. a document fingerprint plus the module's own settings).
pub fn hash_key(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

// =============================================================================
// In-memory cache
// =============================================================================

struct CacheEntry {
    value: CacheValue,
    hit: AtomicBool,
}

/// The real cache: a concurrent map with per-entry hit flags.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU32,
    misses: AtomicU32,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, found: bool) {
        let counter = if found { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl ExecutionCache for MemoryCache {
    fn contains_key(&self, key: &str) -> bool {
        let found = match self.entries.get(key) {
            Some(entry) => {
                entry.hit.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        };
        self.record(found);
        found
    }

    fn try_get_value(&self, key: &str) -> Option<CacheValue> {
        let value = self.entries.get(key).map(|entry| {
            entry.hit.store(true, Ordering::Relaxed);
            entry.value.clone()
        });
        self.record(value.is_some());
        value
    }

    fn set(&self, key: &str, value: CacheValue) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                hit: AtomicBool::new(true),
            },
        );
    }

    fn reset_entry_hits(&self) {
        for entry in self.entries.iter() {
            entry.hit.store(false, Ordering::Relaxed);
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    fn clear_unhit_entries(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.hit.load(Ordering::Relaxed));
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// Cache stand-in used when caching is disabled: always misses, stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ExecutionCache for NoCache {
    fn contains_key(&self, _key: &str) -> bool {
        false
    }

    fn try_get_value(&self, _key: &str) -> Option<CacheValue> {
        None
    }

    fn set(&self, _key: &str, _value: CacheValue) {}

    fn reset_entry_hits(&self) {}

    fn clear_unhit_entries(&self) -> usize {
        0
    }

    fn len(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Hands out one cache namespace per module and drives the generation
/// lifecycle across all of them.
pub struct CacheRegistry {
    enabled: bool,
    caches: DashMap<ModuleId, Arc<dyn ExecutionCache>>,
    disabled: Arc<dyn ExecutionCache>,
}

impl CacheRegistry {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            caches: DashMap::new(),
            disabled: Arc::new(NoCache),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The cache namespace for `module`, created on first use.
    pub fn cache_for(&self, module: ModuleId) -> Arc<dyn ExecutionCache> {
        if !self.enabled {
            return self.disabled.clone();
        }
        self.caches
            .entry(module)
            .or_insert_with(|| Arc::new(MemoryCache::new()))
            .clone()
    }

    pub fn reset_entry_hits(&self) {
        for cache in self.caches.iter() {
            cache.reset_entry_hits();
        }
    }

    /// Sweep every namespace; returns the total number of evicted entries.
    pub fn clear_unhit_entries(&self) -> usize {
        self.caches
            .iter()
            .map(|cache| cache.clear_unhit_entries())
            .sum()
    }

    /// Drop namespaces of modules that are no longer registered.
    pub fn retain_modules(&self, live: impl Fn(ModuleId) -> bool) {
        self.caches.retain(|id, _| live(*id));
    }

    pub fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for cache in self.caches.iter() {
            total += cache.stats();
        }
        total
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Summary of cache activity for an engine run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    pub entries: usize,
}

impl CacheStats {
    pub fn lookups(&self) -> u32 {
        self.hits + self.misses
    }
}

impl AddAssign for CacheStats {
    fn add_assign(&mut self, other: Self) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.entries += other.entries;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lookups() > 0 {
            write!(
                f,
                "{} hits, {} misses ({} lookups, {} entries)",
                self.hits,
                self.misses,
                self.lookups(),
                self.entries
            )
        } else {
            write!(f, "{} entries", self.entries)
        }
    }
}
