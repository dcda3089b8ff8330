use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Rows returned by the raw executor (or served from the cache)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn new(rows: Vec<Value>) -> Self {
        let row_count = rows.len();
        Self { rows, row_count }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

/// Per-call options passed through to the raw executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Advisory timeout, enforced (if at all) by the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Ask the executor for the execution plan instead of rows
    #[serde(default)]
    pub explain: bool,
    /// Bypass the result cache for this call
    #[serde(default)]
    pub skip_cache: bool,
}

impl QueryOptions {
    pub fn explain() -> Self {
        Self {
            explain: true,
            ..Self::default()
        }
    }

    pub fn uncached() -> Self {
        Self {
            skip_cache: true,
            ..Self::default()
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Whether this call may read or write the result cache
    pub fn uses_cache(&self) -> bool {
        !self.explain && !self.skip_cache
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub explain: bool,
    #[serde(default)]
    pub skip_cache: bool,
}

impl QueryRequest {
    pub fn options(&self) -> QueryOptions {
        QueryOptions {
            timeout_ms: self.timeout_ms,
            explain: self.explain,
            skip_cache: self.skip_cache,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// A query that exceeded the slow-query threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQueryRecord {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub sql: String,
    pub params: Vec<Value>,
    pub duration_ms: u64,
}

impl SlowQueryRecord {
    pub fn new(sql: String, params: Vec<Value>, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            sql,
            params,
            duration_ms,
        }
    }
}
