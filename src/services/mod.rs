pub mod connection_pool; // Bounded connection pool with FIFO waiters
pub mod executor; // Raw database executors
pub mod monitor; // Periodic metrics collection and alerting
pub mod query_cache; // Query result cache with FIFO eviction and TTL
pub mod query_service;
pub mod slow_query;

pub use connection_pool::*;
pub use executor::{PostgresExecutor, RawExecutor};
pub use monitor::*;
pub use query_cache::*;
pub use query_service::*;
pub use slow_query::*;
