use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

use crate::adapter::DetectionResult;
use crate::conf::CacheConfig;

/// Byte window hashed from each of start, middle and end of large payloads
pub const SIGNATURE_WINDOW: usize = 4 * 1024;

/// Cache key derived from payload content.
///
/// Payloads up to the configured ceiling hash in full with XXH3-128, where
/// accidental collisions are negligible. Larger payloads hash their length
/// plus three sampled windows, so two large payloads that differ only
/// outside those windows share a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    hash: u128,
    sampled: bool,
}

impl Fingerprint {
    pub fn compute(payload: &[u8], full_hash_limit: usize) -> Self {
        if payload.len() <= full_hash_limit {
            return Self {
                hash: xxh3_128(payload),
                sampled: false,
            };
        }

        let len = payload.len();
        let mid = len / 2 - SIGNATURE_WINDOW.min(len) / 2;
        let mut hasher = Xxh3::new();
        hasher.update(&(len as u64).to_le_bytes());
        hasher.update(&payload[..SIGNATURE_WINDOW.min(len)]);
        hasher.update(&payload[mid..(mid + SIGNATURE_WINDOW).min(len)]);
        hasher.update(&payload[len.saturating_sub(SIGNATURE_WINDOW)..]);
        Self {
            hash: hasher.digest128(),
            sampled: true,
        }
    }

    /// True when derived from sampled windows rather than the full content
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.hash)?;
        if self.sampled {
            f.write_str("~")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: DetectionResult,
    pub created_at: Instant,
    pub last_used: Instant,
    pub size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) >= ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub memory_bytes: usize,
    pub hit_rate: f64,
}

struct CacheInner {
    entries: LruCache<Fingerprint, CacheEntry>,
    memory_bytes: usize,
}

impl CacheInner {
    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.pop(fingerprint)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }
}

/// Fingerprint → DetectionResult map bounded by entry count, estimated
/// memory and TTL. Least-recently-used entries are evicted first.
///
/// One mutex serializes `get`/`put`; counters live outside it.
pub struct SignatureCache {
    config: CacheConfig,
    ttl: Duration,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl SignatureCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: config.ttl(),
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                memory_bytes: 0,
            }),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn fingerprint(&self, payload: &[u8]) -> Fingerprint {
        Fingerprint::compute(payload, self.config.max_payload_size)
    }

    /// Look up a live entry, refreshing its recency. Expired entries are
    /// dropped and count as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<DetectionResult> {
        if !self.config.enabled {
            return None;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get_mut(fingerprint) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                entry.last_used = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%fingerprint, "signature cache hit");
                return Some(entry.result.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.remove(fingerprint);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a result. Returns false when the cache is disabled, the best
    /// score is below `min_confidence_to_cache`, or the entry alone exceeds
    /// the memory ceiling.
    pub fn put(&self, fingerprint: Fingerprint, result: DetectionResult, size_hint: usize) -> bool {
        if !self.config.enabled || result.best_score() < self.config.min_confidence_to_cache {
            return false;
        }

        let size_bytes = size_hint + result.estimated_size() + std::mem::size_of::<CacheEntry>();
        if size_bytes > self.config.max_memory_bytes {
            return false;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.remove(&fingerprint);

        while inner.memory_bytes + size_bytes > self.config.max_memory_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.memory_bytes = inner.memory_bytes.saturating_sub(evicted.size_bytes);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        let entry = CacheEntry {
            fingerprint,
            result,
            created_at: now,
            last_used: now,
            size_bytes,
        };
        // Same key was removed above, so anything returned is the LRU victim
        if let Some((_, evicted)) = inner.entries.push(fingerprint, entry) {
            inner.memory_bytes = inner.memory_bytes.saturating_sub(evicted.size_bytes);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        inner.memory_bytes += size_bytes;
        true
    }

    /// Drop every entry (adapter set changed)
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    /// Remove expired entries now instead of on next lookup. Returns the count.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(fingerprint, _)| *fingerprint)
            .collect();

        for fingerprint in &expired {
            inner.remove(fingerprint);
        }
        self.expirations.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, memory_bytes) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.memory_bytes)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            entries,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            memory_bytes,
            hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            } else {
                0.0
            },
        }
    }
}

impl fmt::Debug for SignatureCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
