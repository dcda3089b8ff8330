use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Running snapshot of query-layer statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Queries that reached the executor and succeeded
    pub total_queries: u64,
    pub slow_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    /// Mean executor latency, cache hits excluded
    pub average_duration_ms: f64,
    /// active / (active + idle) at the last update
    pub pool_usage: f64,
}

impl PerformanceMetrics {
    /// Count a successful execution and fold its latency into the average
    pub fn record_execution(&mut self, duration_ms: f64) {
        self.total_queries += 1;
        let n = self.total_queries as f64;
        self.average_duration_ms = (self.average_duration_ms * (n - 1.0) + duration_ms) / n;
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn record_cache_miss(&mut self) {
        self.cache_misses += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn record_slow_query(&mut self) {
        self.slow_queries += 1;
    }

    /// Fraction of executor attempts that failed (0.0 to 1.0)
    pub fn error_rate(&self) -> f64 {
        let attempts = self.total_queries + self.errors;
        if attempts == 0 {
            0.0
        } else {
            self.errors as f64 / attempts as f64
        }
    }

    /// Fraction of cache lookups that hit (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PoolUsage,
    SlowQueryCount,
    ErrorRate,
}

/// A threshold breach observed on a collection tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, value: f64, threshold: f64) -> Self {
        let message = match kind {
            AlertKind::PoolUsage => format!(
                "Connection pool usage {:.0}% exceeds {:.0}%",
                value * 100.0,
                threshold * 100.0
            ),
            AlertKind::SlowQueryCount => format!(
                "{} slow queries recorded (threshold {})",
                value as u64, threshold as u64
            ),
            AlertKind::ErrorRate => format!(
                "Query error rate {:.1}% exceeds {:.1}%",
                value * 100.0,
                threshold * 100.0
            ),
        };
        Self {
            kind,
            value,
            threshold,
            message,
            raised_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}
