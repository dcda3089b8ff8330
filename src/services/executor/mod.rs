// Raw executor abstraction: the only component that talks to a database
pub mod postgresql;
#[cfg(test)]
pub mod scripted;

pub use postgresql::PostgresExecutor;

use crate::api::middleware::AppError;
use crate::models::{QueryOptions, QueryResult};
use serde_json::Value;

/// Raw executor trait - connect, execute and disconnect against one database target
///
/// The orchestration layer (pool, cache, metrics) is generic over this trait;
/// implementations own the wire protocol and row conversion.
#[async_trait::async_trait]
pub trait RawExecutor: Send + Sync + 'static {
    /// Opaque handle to one underlying database link
    type Connection: Send + Sync + 'static;

    /// Open a new database link
    async fn connect(&self) -> Result<Self::Connection, AppError>;

    /// Execute a statement with ordered parameters on an open link
    ///
    /// `options.timeout_ms` is advisory; `options.explain` asks for the
    /// execution plan instead of rows.
    async fn run(
        &self,
        conn: &Self::Connection,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> Result<QueryResult, AppError>;

    /// Close a database link
    async fn disconnect(&self, conn: Self::Connection);

    /// Whether a link can be returned to the idle set
    fn is_healthy(&self, _conn: &Self::Connection) -> bool {
        true
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}
