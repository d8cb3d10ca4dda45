//! Bounded, time-expiring response cache keyed by operation fingerprints.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::debug;
use serde_json::Value;

/// Time source for entry expiry. Injectable so tests can advance time
/// without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic fingerprint of an operation call.
///
/// Positional arguments keep their order; keyword arguments live in a
/// sorted map, so the order they were supplied in never changes the key.
/// The operation name leads the fingerprint, giving each cached operation
/// its own key namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: &'static str,
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Record a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Record a keyword argument only if present. Absent optionals are
    /// omitted from the fingerprint entirely, matching how they are omitted
    /// from the query string.
    pub fn kwarg_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.kwarg(name, value),
            None => self,
        }
    }
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Monotonic access counter backing the LRU order.
    tick: u64,
}

/// Memoizes successful JSON responses per operation fingerprint.
///
/// Capacity and TTL are fixed at construction. Expired entries are purged
/// on any access; when an insert would exceed capacity the least-recently
/// used live entry is evicted. Failed computations are never stored.
pub struct ResponseCache {
    maxsize: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(maxsize: usize, ttl: Duration) -> Self {
        Self::with_clock(maxsize, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(maxsize: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            maxsize,
            ttl,
            clock,
            inner: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the cached value for `key` if a live entry exists, otherwise
    /// runs `compute`, stores its result, and returns it.
    ///
    /// Concurrent calls with the same key may each run `compute`; the store
    /// itself stays consistent. The interior lock is never held across an
    /// await, so `compute` runs unlocked.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(value) = self.lookup(&key) {
            debug!("cache hit for {}", key.operation());
            return Ok(value);
        }

        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Number of entries currently stored, expired ones included.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        state
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);

        state.tick += 1;
        let tick = state.tick;
        let entry = state.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.value.clone())
    }

    fn insert(&self, key: CacheKey, value: Value) {
        if self.maxsize == 0 {
            return;
        }

        let now = self.clock.now();
        let ttl = self.ttl;
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        state
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);

        if !state.entries.contains_key(&key) && state.entries.len() >= self.maxsize {
            let lru = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(lru) = lru {
                debug!("cache full, evicting {}", lru.operation());
                state.entries.remove(&lru);
            }
        }

        state.tick += 1;
        let tick = state.tick;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_used: tick,
            },
        );
    }
}
