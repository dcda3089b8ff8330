use std::sync::Arc;

use crate::config::Config;
use crate::services::executor::RawExecutor;
use crate::services::monitor::PerformanceMonitor;
use crate::services::query_service::QueryService;

pub mod monitoring;
pub mod query;

/// Application state
pub struct AppState<E: RawExecutor> {
    pub config: Config,
    pub service: QueryService<E>,
    pub monitor: Arc<PerformanceMonitor<E>>,
}

// Derive would demand `E: Clone`
impl<E: RawExecutor> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            service: self.service.clone(),
            monitor: Arc::clone(&self.monitor),
        }
    }
}
