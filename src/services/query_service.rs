use crate::api::middleware::AppError;
use crate::config::{CacheConfig, PoolConfig, SlowQueryConfig};
use crate::models::{HealthStatus, PerformanceMetrics, QueryOptions, QueryResult, SlowQueryRecord};
use crate::services::connection_pool::{ConnectionPool, PoolStatus};
use crate::services::executor::RawExecutor;
use crate::services::query_cache::{CacheStats, QueryResultCache};
use crate::services::slow_query::{IndexSuggestion, SlowQueryAnalyzer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Canary statement issued by `health_check`
const HEALTH_CHECK_SQL: &str = "SELECT 1";
const HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

/// Result of a health probe; never an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub pool: PoolStatus,
    pub cache_hit_rate: f64,
    pub metrics: PerformanceMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

struct Inner<E: RawExecutor> {
    pool: Arc<ConnectionPool<E>>,
    cache: QueryResultCache,
    analyzer: SlowQueryAnalyzer,
    metrics: Mutex<PerformanceMetrics>,
}

/// Query orchestrator for one database target
///
/// Sequences cache lookup, pool acquire, raw execution, release, cache store
/// and metrics for every `query` call. Cloning shares the same pool, cache and
/// metrics.
pub struct QueryService<E: RawExecutor> {
    inner: Arc<Inner<E>>,
}

impl<E: RawExecutor> Clone for QueryService<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: RawExecutor> QueryService<E> {
    pub fn new(
        executor: Arc<E>,
        pool: PoolConfig,
        cache: &CacheConfig,
        slow_query: &SlowQueryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool: Arc::new(ConnectionPool::new(executor, pool)),
                cache: QueryResultCache::new(cache),
                analyzer: SlowQueryAnalyzer::new(slow_query),
                metrics: Mutex::new(PerformanceMetrics::default()),
            }),
        }
    }

    fn update_metrics(&self, update: impl FnOnce(&mut PerformanceMetrics)) {
        let mut metrics = self
            .inner
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    /// Execute a statement with ordered parameters
    ///
    /// Cacheable statements are served from the cache when possible. Execution
    /// and pool errors are counted and returned unchanged; cache failures are
    /// logged and fall through to live execution.
    pub async fn query(
        &self,
        sql: &str,
        params: &[Value],
        options: QueryOptions,
    ) -> Result<QueryResult, AppError> {
        let cache_key = (options.uses_cache()
            && self.inner.cache.is_enabled()
            && QueryResultCache::is_cacheable(sql))
        .then(|| QueryResultCache::generate_key(sql, params));

        if let Some(key) = &cache_key {
            match self.inner.cache.get(key) {
                Ok(Some(result)) => {
                    self.update_metrics(|m| m.record_cache_hit());
                    return Ok(result);
                }
                Ok(None) => self.update_metrics(|m| m.record_cache_miss()),
                Err(e) => tracing::warn!("Cache lookup failed, executing live: {}", e),
            }
        }

        let (result, elapsed) = match self.execute(sql, params, &options).await {
            Ok(executed) => executed,
            Err(e) => {
                let usage = self.inner.pool.status().utilization();
                self.update_metrics(|m| {
                    m.record_error();
                    m.pool_usage = usage;
                });
                tracing::error!("Query execution error: {} (sql: {})", e, sql);
                return Err(e);
            }
        };

        if let Some(key) = cache_key {
            if let Err(e) = self.inner.cache.put(key, result.clone()) {
                tracing::warn!("Failed to cache query result: {}", e);
            }
        }

        let duration_ms = elapsed.as_millis() as u64;
        let usage = self.inner.pool.status().utilization();
        self.update_metrics(|m| {
            m.record_execution(elapsed.as_secs_f64() * 1000.0);
            m.pool_usage = usage;
        });

        // Plan inspection calls are not themselves slow-query candidates
        if !options.explain && self.inner.analyzer.is_slow(elapsed) {
            self.inner.analyzer.record(sql, params, duration_ms);
            self.update_metrics(|m| m.record_slow_query());
            if self.inner.analyzer.explain_on_slow() {
                self.spawn_explain(sql.to_string(), params.to_vec());
            }
        }

        Ok(result)
    }

    /// Acquire, run and release; the connection is returned on every path
    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> Result<(QueryResult, Duration), AppError> {
        let conn = self.inner.pool.acquire().await?;
        let started = Instant::now();
        let outcome = self
            .inner
            .pool
            .executor()
            .run(conn.link(), sql, params, options)
            .await;
        let elapsed = started.elapsed();
        conn.release();
        outcome.map(|result| (result, elapsed))
    }

    /// Re-issue a statement in plan-inspection mode and derive advice from the plan
    pub async fn explain(&self, sql: &str, params: &[Value]) -> Result<Vec<String>, AppError> {
        let plan = self.query(sql, params, QueryOptions::explain()).await?;
        let advice = SlowQueryAnalyzer::analyze_plan(&plan);
        for line in &advice {
            tracing::info!("Plan advice for `{}`: {}", sql, line);
        }
        Ok(advice)
    }

    // Runs after the caller already has its result
    fn spawn_explain(&self, sql: String, params: Vec<Value>) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.explain(&sql, &params).await {
                tracing::debug!("Plan inspection for slow query failed: {}", e);
            }
        });
    }

    /// Probe the database with a canary query
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let outcome = self
            .query(
                HEALTH_CHECK_SQL,
                &[],
                QueryOptions::uncached().with_timeout_ms(HEALTH_CHECK_TIMEOUT_MS),
            )
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let metrics = self.metrics();
        let (status, error) = match outcome {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                tracing::warn!("Health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        HealthReport {
            status,
            response_time_ms,
            pool: self.pool_status(),
            cache_hit_rate: metrics.cache_hit_rate(),
            metrics,
            error,
            checked_at: Utc::now(),
        }
    }

    /// Open `pool.min_size` connections ahead of traffic
    pub async fn warm_up(&self) -> usize {
        self.inner.pool.warm_up().await
    }

    /// Periodic housekeeping: expire cache entries and close long-idle connections
    pub async fn maintain(&self) {
        if let Err(e) = self.inner.cache.cleanup_expired() {
            tracing::warn!("Cache cleanup failed: {}", e);
        }
        self.inner.pool.reap_idle().await;
    }

    /// Recompute pool utilization into the metrics snapshot
    pub fn refresh_pool_usage(&self) -> f64 {
        let usage = self.inner.pool.status().utilization();
        self.update_metrics(|m| m.pool_usage = usage);
        usage
    }

    pub fn clear_cache(&self) -> Result<usize, AppError> {
        self.inner.cache.clear()
    }

    pub fn reset_metrics(&self) {
        let usage = self.inner.pool.status().utilization();
        self.update_metrics(|m| {
            *m = PerformanceMetrics {
                pool_usage: usage,
                ..PerformanceMetrics::default()
            }
        });
        tracing::info!("Query metrics reset");
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.inner
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.get_stats()
    }

    pub fn cache_size(&self) -> usize {
        self.inner.cache.size()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    pub fn slow_queries(&self, limit: usize) -> Vec<SlowQueryRecord> {
        self.inner.analyzer.recent(limit)
    }

    pub fn index_suggestions(&self) -> Vec<IndexSuggestion> {
        self.inner.analyzer.suggest_missing_indexes()
    }

    pub fn register_index(&self, table: &str, column: &str) {
        self.inner.analyzer.register_index(table, column);
    }

    /// Close the pool, waiting for in-flight queries to release their connections
    pub async fn shutdown(&self) {
        self.inner.pool.close().await;
    }
}
