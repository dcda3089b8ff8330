// Query Result Cache Service
//
// FIFO cache for read-only query results with TTL support.
// Entries are evicted in insertion order, independent of how often they are read.

use crate::api::middleware::AppError;
use crate::config::CacheConfig;
use crate::models::QueryResult;
use crate::validation::SqlInspector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Constructs whose result changes between executions; statements using them are never cached
const NON_DETERMINISTIC: &[&str] = &[
    "random(",
    "rand(",
    "now(",
    "current_timestamp",
    "current_date",
    "current_time",
    "localtimestamp",
    "localtime",
    "sysdate",
    "clock_timestamp",
    "statement_timestamp",
    "uuid(",
    "gen_random_uuid",
    "uuid_generate",
    "newid(",
    "sleep(",
    "pg_sleep",
    "benchmark(",
    "nextval(",
    "for update",
    "for share",
];

/// Cached query result with metadata
#[derive(Debug, Clone)]
struct CachedResult {
    result: QueryResult,
    expires_at: Instant,
    hit_count: u64,
}

impl CachedResult {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CachedResult>,
    /// Keys in insertion order, oldest first
    order: VecDeque<String>,
    stats: CacheStats,
}

impl CacheInner {
    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Total expirations
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Query result cache with FIFO eviction and TTL
///
/// Features:
/// - FIFO eviction when cache is full
/// - Lazy TTL expiration on lookup, plus an explicit sweep
/// - Cache statistics (hit/miss ratio)
/// - One lock guards entries, insertion order and stats together
pub struct QueryResultCache {
    inner: Mutex<CacheInner>,
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
}

impl QueryResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            enabled: config.enabled,
            max_entries: config.max_entries,
            ttl: Duration::from_millis(config.ttl_ms),
        }
    }

    /// Create an enabled cache with the given capacity and TTL
    pub fn with_capacity(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            enabled: true,
            max_entries,
            ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheInner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Cache("cache lock poisoned".to_string()))
    }

    /// Whether a statement's result may be cached
    ///
    /// Only read-only statements free of non-deterministic constructs qualify.
    pub fn is_cacheable(sql: &str) -> bool {
        let normalized = SqlInspector::normalize(sql).to_lowercase();
        // `now ()` and `now()` are the same call
        let compact = normalized.replace(" (", "(");
        if NON_DETERMINISTIC.iter().any(|marker| compact.contains(marker)) {
            return false;
        }
        SqlInspector::is_read_only(&normalized)
    }

    /// Generate cache key from the normalized statement and its ordered parameters
    ///
    /// SHA-256 keeps keys stable across processes.
    pub fn generate_key(sql: &str, params: &[Value]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(SqlInspector::normalize(sql).as_bytes());
        for param in params {
            hasher.update([0u8]);
            hasher.update(param.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Get cached result if available and not expired
    ///
    /// Expired entries are removed and count as a miss.
    pub fn get(&self, key: &str) -> Result<Option<QueryResult>, AppError> {
        if !self.enabled {
            return Ok(None);
        }

        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let now = Instant::now();

        let expired = match inner.entries.get_mut(key) {
            Some(cached) if !cached.is_expired(now) => {
                cached.hit_count += 1;
                let hit_count = cached.hit_count;
                let result = cached.result.clone();
                inner.stats.hits += 1;
                tracing::debug!("Cache hit for key: {} (hit_count: {})", key, hit_count);
                return Ok(Some(result));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            tracing::debug!("Cache expired for key: {}", key);
        } else {
            tracing::debug!("Cache miss for key: {}", key);
        }
        inner.stats.misses += 1;
        Ok(None)
    }

    /// Store query result in cache
    ///
    /// At capacity, the oldest-inserted entry is evicted in the same critical section.
    /// Re-storing a key replaces it and moves it to the back of the insertion order.
    pub fn put(&self, key: String, result: QueryResult) -> Result<(), AppError> {
        if !self.enabled || self.max_entries == 0 {
            return Ok(());
        }

        let mut inner = self.lock()?;

        if inner.entries.contains_key(&key) {
            inner.remove(&key);
        }

        while inner.entries.len() >= self.max_entries {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                    inner.stats.evictions += 1;
                    tracing::debug!("Evicted cache entry: {}", oldest);
                }
                None => break,
            }
        }

        inner.entries.insert(
            key.clone(),
            CachedResult {
                result,
                expires_at: Instant::now() + self.ttl,
                hit_count: 0,
            },
        );
        inner.order.push_back(key.clone());

        tracing::debug!("Cached result for key: {} (cache size: {})", key, inner.entries.len());
        Ok(())
    }

    /// Clear all cache entries
    pub fn clear(&self) -> Result<usize, AppError> {
        let mut inner = self.lock()?;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();

        tracing::info!("Cleared {} cache entries", count);
        Ok(count)
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> CacheStats {
        self.lock().map(|inner| inner.stats.clone()).unwrap_or_default()
    }

    /// Get current cache size
    pub fn size(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    /// Remove expired entries; returns how many were removed
    pub fn cleanup_expired(&self) -> Result<usize, AppError> {
        let mut inner = self.lock()?;
        let now = Instant::now();

        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, cached)| cached.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            inner.entries.remove(key);
        }
        inner.order.retain(|k| !expired_keys.contains(k));
        inner.stats.expirations += expired_keys.len() as u64;

        if !expired_keys.is_empty() {
            tracing::info!("Cleaned up {} expired cache entries", expired_keys.len());
        }
        Ok(expired_keys.len())
    }
}
