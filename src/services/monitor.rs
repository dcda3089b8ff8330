// Performance Monitor
//
// Periodic metric collection, threshold alerts and reports. One background task
// runs two timers: collection (housekeeping, pool usage, alerts) and report.
// The returned `MonitorTask` stops the task on `stop()` and aborts it when dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{AlertThresholds, MonitoringConfig};
use crate::models::{Alert, AlertKind, PerformanceMetrics, SlowQueryRecord};
use crate::services::connection_pool::PoolStatus;
use crate::services::executor::RawExecutor;
use crate::services::query_cache::CacheStats;
use crate::services::query_service::QueryService;
use crate::services::slow_query::IndexSuggestion;

/// Alerts retained for reports
const MAX_RECENT_ALERTS: usize = 100;
/// Slow queries included in a report
const REPORT_SLOW_QUERIES: usize = 10;
/// Index suggestions promoted into report recommendations
const REPORT_INDEX_RECOMMENDATIONS: usize = 3;
/// Below this many lookups the hit rate is not judged
const MIN_LOOKUPS_FOR_HIT_RATE: u64 = 20;

/// Full snapshot assembled on the report interval (or on demand)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
    pub pool: PoolStatus,
    pub cache_size: usize,
    pub cache_hit_rate: f64,
    pub cache_stats: CacheStats,
    pub recent_slow_queries: Vec<SlowQueryRecord>,
    pub recent_alerts: Vec<Alert>,
    pub index_suggestions: Vec<IndexSuggestion>,
    pub recommendations: Vec<String>,
}

/// Compare a metrics snapshot against the alert thresholds
pub fn evaluate_thresholds(metrics: &PerformanceMetrics, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if metrics.pool_usage > thresholds.pool_usage {
        alerts.push(Alert::new(AlertKind::PoolUsage, metrics.pool_usage, thresholds.pool_usage));
    }
    if metrics.slow_queries > thresholds.slow_query_count {
        alerts.push(Alert::new(
            AlertKind::SlowQueryCount,
            metrics.slow_queries as f64,
            thresholds.slow_query_count as f64,
        ));
    }
    let error_rate = metrics.error_rate();
    if error_rate > thresholds.error_rate {
        alerts.push(Alert::new(AlertKind::ErrorRate, error_rate, thresholds.error_rate));
    }
    alerts
}

/// Derive textual tuning advice from the current state
pub fn recommendations(
    metrics: &PerformanceMetrics,
    pool: &PoolStatus,
    thresholds: &AlertThresholds,
    index_suggestions: &[IndexSuggestion],
) -> Vec<String> {
    let mut advice = Vec::new();

    if metrics.pool_usage > thresholds.pool_usage || pool.waiting > 0 {
        advice.push(format!(
            "Connection pool usage is {:.0}%: consider increasing pool.max_size (currently {})",
            metrics.pool_usage * 100.0,
            pool.max_size
        ));
    }

    let lookups = metrics.cache_hits + metrics.cache_misses;
    if lookups >= MIN_LOOKUPS_FOR_HIT_RATE && metrics.cache_hit_rate() < 0.5 {
        advice.push(format!(
            "Cache hit rate is {:.0}%: consider raising cache.ttl_ms or cache.max_entries",
            metrics.cache_hit_rate() * 100.0
        ));
    }

    if metrics.slow_queries > thresholds.slow_query_count {
        advice.push(format!(
            "{} slow queries recorded: review the slow-query log and the index suggestions",
            metrics.slow_queries
        ));
    }

    if metrics.error_rate() > thresholds.error_rate {
        advice.push(format!(
            "Query error rate is {:.1}%: investigate failing statements and database availability",
            metrics.error_rate() * 100.0
        ));
    }

    advice.extend(
        index_suggestions
            .iter()
            .take(REPORT_INDEX_RECOMMENDATIONS)
            .map(|s| s.suggestion.clone()),
    );

    advice
}

/// Observes one query service; purely observational, never corrects anything
pub struct PerformanceMonitor<E: RawExecutor> {
    service: QueryService<E>,
    config: MonitoringConfig,
    alerts: Mutex<VecDeque<Alert>>,
}

impl<E: RawExecutor> PerformanceMonitor<E> {
    pub fn new(service: QueryService<E>, config: MonitoringConfig) -> Self {
        Self {
            service,
            config,
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    /// One collection tick
    pub async fn collect(&self) -> Vec<Alert> {
        self.service.maintain().await;
        self.service.refresh_pool_usage();

        let metrics = self.service.metrics();
        let alerts = evaluate_thresholds(&metrics, &self.config.alert_thresholds);
        for alert in &alerts {
            tracing::warn!(
                kind = ?alert.kind,
                value = alert.value,
                threshold = alert.threshold,
                "Performance alert: {}",
                alert.message
            );
        }

        tracing::debug!(
            total_queries = metrics.total_queries,
            pool_usage = metrics.pool_usage,
            cache_hit_rate = metrics.cache_hit_rate(),
            errors = metrics.errors,
            "metrics collected"
        );

        if !alerts.is_empty() {
            let mut recent = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
            recent.extend(alerts.iter().cloned());
            while recent.len() > MAX_RECENT_ALERTS {
                recent.pop_front();
            }
        }

        alerts
    }

    /// Alerts raised so far, oldest first
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn report(&self) -> PerformanceReport {
        let metrics = self.service.metrics();
        let pool = self.service.pool_status();
        let index_suggestions = self.service.index_suggestions();
        let recommendations = recommendations(
            &metrics,
            &pool,
            &self.config.alert_thresholds,
            &index_suggestions,
        );

        PerformanceReport {
            generated_at: Utc::now(),
            cache_hit_rate: metrics.cache_hit_rate(),
            metrics,
            pool,
            cache_size: self.service.cache_size(),
            cache_stats: self.service.cache_stats(),
            recent_slow_queries: self.service.slow_queries(REPORT_SLOW_QUERIES),
            recent_alerts: self.recent_alerts(),
            index_suggestions,
            recommendations,
        }
    }

    /// Start the periodic collection/report task
    pub fn spawn(self: &Arc<Self>) -> MonitorTask {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            monitor.run(shutdown_rx).await;
        });

        tracing::info!(
            collection_interval_ms = self.config.collection_interval_ms,
            report_interval_ms = self.config.report_interval_ms,
            "performance monitor started"
        );

        MonitorTask {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut collect = tokio::time::interval(Duration::from_millis(self.config.collection_interval_ms));
        let mut report = tokio::time::interval(Duration::from_millis(self.config.report_interval_ms));
        collect.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Both intervals fire immediately once; start counting from now instead
        collect.tick().await;
        report.tick().await;

        loop {
            tokio::select! {
                _ = collect.tick() => {
                    self.collect().await;
                }
                _ = report.tick() => {
                    let report = self.report();
                    match serde_json::to_string(&report) {
                        Ok(json) => tracing::info!(report = %json, "performance report"),
                        Err(e) => tracing::warn!(error = %e, "failed to serialize performance report"),
                    }
                    for line in &report.recommendations {
                        tracing::info!("Recommendation: {}", line);
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("performance monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle to the running monitor task
pub struct MonitorTask {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl MonitorTask {
    /// Signal the task and wait for it to finish
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        tracing::info!("performance monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for MonitorTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
