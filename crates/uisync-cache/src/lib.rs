//! In-memory memoization of parsed ASTs and derived IR.
//!
//! Entries are addressed by `(namespace, path)` and carry the [`Fingerprint`] of the file they
//! were computed from; a lookup with a different fingerprint is a miss. The cache is bounded by
//! entry count and estimated payload bytes (oldest insertion evicted first) and entries expire
//! after a TTL. Nothing here is persisted across restarts.

mod error;
mod fingerprint;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use uisync_config::CacheConfig;
use uisync_core::{normalize_local_path, Ast, ComponentIr};

pub use error::{CacheError, Result};
pub use fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Ast,
    Ir,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Ast, Namespace::Ir];
}

#[derive(Debug, Clone)]
enum Payload {
    Ast(Arc<Ast>),
    Ir(Arc<ComponentIr>),
}

enum Lookup {
    Hit(Payload),
    Expired,
    Stale,
}

#[derive(Debug)]
struct CacheEntry {
    fingerprint: Fingerprint,
    payload: Payload,
    inserted_at: Instant,
    size_bytes: usize,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order: front = oldest.
    entries: IndexMap<(Namespace, PathBuf), CacheEntry>,
    bytes: usize,
    evictions: u64,
    expirations: u64,
}

impl Inner {
    fn remove(&mut self, key: &(Namespace, PathBuf)) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.bytes = self.bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<CacheEntry> {
        let (_, entry) = self.entries.shift_remove_index(0)?;
        self.bytes = self.bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, TTL-expiring AST/IR cache safe for concurrent use from worker tasks.
#[derive(Debug)]
pub struct ConversionCache {
    max_entries: usize,
    max_memory_bytes: usize,
    ttl: Duration,
    enabled: AtomicBool,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ConversionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries.max(1),
            max_memory_bytes: config.max_memory_bytes.max(1),
            ttl: config.ttl(),
            enabled: AtomicBool::new(config.enabled),
            inner: Mutex::new(Inner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turns caching on or off. Disabling drops every entry; while disabled, every `get` misses
    /// and every `set` is ignored.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.clear();
        }
    }

    pub fn get_ast(&self, path: &Path, fingerprint: Fingerprint) -> Option<Arc<Ast>> {
        match self.get_at(Namespace::Ast, path, fingerprint, Instant::now())? {
            Payload::Ast(ast) => Some(ast),
            Payload::Ir(_) => None,
        }
    }

    pub fn set_ast(&self, path: &Path, fingerprint: Fingerprint, ast: Arc<Ast>) {
        let size = ast.estimated_size();
        self.set_at(
            Namespace::Ast,
            path,
            fingerprint,
            Payload::Ast(ast),
            size,
            Instant::now(),
        );
    }

    pub fn get_ir(&self, path: &Path, fingerprint: Fingerprint) -> Option<Arc<ComponentIr>> {
        match self.get_at(Namespace::Ir, path, fingerprint, Instant::now())? {
            Payload::Ir(ir) => Some(ir),
            Payload::Ast(_) => None,
        }
    }

    pub fn set_ir(&self, path: &Path, fingerprint: Fingerprint, ir: Arc<ComponentIr>) {
        let size = ir.estimated_size();
        self.set_at(
            Namespace::Ir,
            path,
            fingerprint,
            Payload::Ir(ir),
            size,
            Instant::now(),
        );
    }

    /// Removes every entry (both namespaces) for `path`. Returns how many entries were dropped.
    pub fn invalidate(&self, path: &Path) -> usize {
        let path = normalize_local_path(path);
        let mut inner = self.inner.lock();
        Namespace::ALL
            .into_iter()
            .filter_map(|ns| inner.remove(&(ns, path.clone())))
            .count()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            enabled: self.is_enabled(),
            entries: inner.entries.len(),
            bytes: inner.bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }

    fn get_at(
        &self,
        namespace: Namespace,
        path: &Path,
        fingerprint: Fingerprint,
        now: Instant,
    ) -> Option<Payload> {
        if !self.is_enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let key = (namespace, normalize_local_path(path));
        let mut inner = self.inner.lock();
        let lookup = inner.entries.get(&key).map(|entry| {
            if now.saturating_duration_since(entry.inserted_at) >= self.ttl {
                Lookup::Expired
            } else if entry.fingerprint != fingerprint {
                Lookup::Stale
            } else {
                Lookup::Hit(entry.payload.clone())
            }
        });
        let hit = match lookup {
            None => None,
            Some(Lookup::Hit(payload)) => Some(payload),
            Some(Lookup::Expired) => {
                inner.remove(&key);
                inner.expirations += 1;
                None
            }
            Some(Lookup::Stale) => {
                // The file changed since this entry was computed; it can never hit again.
                inner.remove(&key);
                None
            }
        };
        drop(inner);

        let counter = if hit.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    fn set_at(
        &self,
        namespace: Namespace,
        path: &Path,
        fingerprint: Fingerprint,
        payload: Payload,
        size_bytes: usize,
        now: Instant,
    ) {
        if !self.is_enabled() {
            return;
        }

        let path = normalize_local_path(path);
        if size_bytes > self.max_memory_bytes {
            tracing::debug!(
                target = "uisync.cache",
                path = %path.display(),
                size_bytes,
                max_memory_bytes = self.max_memory_bytes,
                "payload larger than cache budget; not caching"
            );
            return;
        }

        let key = (namespace, path);
        let mut inner = self.inner.lock();
        inner.remove(&key);

        // Entries share one TTL, so expired entries are always a prefix of insertion order.
        while let Some((_, oldest)) = inner.entries.first() {
            if now.saturating_duration_since(oldest.inserted_at) < self.ttl {
                break;
            }
            inner.pop_oldest();
            inner.expirations += 1;
        }

        let mut evicted = 0u64;
        while !inner.entries.is_empty()
            && (inner.entries.len() + 1 > self.max_entries
                || inner.bytes + size_bytes > self.max_memory_bytes)
        {
            inner.pop_oldest();
            evicted += 1;
        }

        inner.entries.insert(
            key,
            CacheEntry {
                fingerprint,
                payload,
                inserted_at: now,
                size_bytes,
            },
        );
        inner.bytes += size_bytes;
        inner.evictions += evicted;

        if evicted > 0 {
            tracing::debug!(
                target = "uisync.cache",
                evicted,
                entries = inner.entries.len(),
                bytes = inner.bytes,
                "evicted oldest cache entries"
            );
        }
    }
}
