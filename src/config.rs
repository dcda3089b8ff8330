use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub slow_query: SlowQueryConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// 0 fails fast with `PoolExhausted`; >0 queues the caller for up to this long
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlowQueryConfig {
    pub threshold_ms: u64,
    pub explain_on_slow: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub collection_interval_ms: u64,
    pub report_interval_ms: u64,
    pub alert_thresholds: AlertThresholds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertThresholds {
    pub pool_usage: f64,
    pub slow_query_count: u64,
    pub error_rate: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout_ms: 0,
            idle_timeout_ms: 600_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl_ms: 300_000,
        }
    }
}

impl Default for SlowQueryConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 1000,
            explain_on_slow: false,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            collection_interval_ms: 30_000,
            report_interval_ms: 300_000,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            pool_usage: 0.8,
            slow_query_count: 10,
            error_rate: 0.05,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file first so its values are visible below
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "postgresql://postgres@localhost:5432/postgres")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("pool.min_size", 2)?
            .set_default("pool.max_size", 10)?
            .set_default("pool.acquire_timeout_ms", 0)?
            .set_default("pool.idle_timeout_ms", 600_000)?
            .set_default("cache.enabled", true)?
            .set_default("cache.max_entries", 1000)?
            .set_default("cache.ttl_ms", 300_000)?
            .set_default("slow_query.threshold_ms", 1000)?
            .set_default("slow_query.explain_on_slow", false)?
            .set_default("monitoring.collection_interval_ms", 30_000)?
            .set_default("monitoring.report_interval_ms", 300_000)?
            .set_default("monitoring.alert_thresholds.pool_usage", 0.8)?
            .set_default("monitoring.alert_thresholds.slow_query_count", 10)?
            .set_default("monitoring.alert_thresholds.error_rate", 0.05)?
            .add_source(
                config::Environment::with_prefix("QUERY_LAYER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        // Load from environment variables
        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.pool.max_size == 0 {
            return Err(config::ConfigError::Message(
                "pool.max_size must be at least 1".to_string(),
            ));
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(config::ConfigError::Message(format!(
                "pool.min_size ({}) exceeds pool.max_size ({})",
                self.pool.min_size, self.pool.max_size
            )));
        }
        if self.monitoring.collection_interval_ms == 0 || self.monitoring.report_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "monitoring intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
