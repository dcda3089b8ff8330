// In-memory executor for tests: scripted latency, failures and plans
use crate::api::middleware::AppError;
use crate::models::{QueryOptions, QueryResult};
use crate::services::executor::RawExecutor;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
pub struct ScriptedLink {
    pub id: u64,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    latency: Mutex<Vec<(String, Duration)>>,
    default_latency: Mutex<Duration>,
    connect_latency: Mutex<Duration>,
    plan: Mutex<Vec<String>>,
    unreachable: AtomicBool,
    fail_runs: AtomicBool,
    next_link: AtomicU64,
    pub connects: AtomicUsize,
    pub runs: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `pattern` take `latency` to run
    pub fn with_latency(self, pattern: &str, latency: Duration) -> Self {
        self.latency.lock().unwrap().push((pattern.to_string(), latency));
        self
    }

    pub fn with_default_latency(self, latency: Duration) -> Self {
        *self.default_latency.lock().unwrap() = latency;
        self
    }

    /// Plan lines returned for explain-mode calls
    pub fn with_connect_latency(self, latency: Duration) -> Self {
        *self.connect_latency.lock().unwrap() = latency;
        self
    }

    pub fn with_plan(self, lines: &[&str]) -> Self {
        *self.plan.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_runs.store(failing, Ordering::SeqCst);
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn latency_for(&self, sql: &str) -> Duration {
        let latency = self.latency.lock().unwrap();
        latency
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, d)| *d)
            .unwrap_or(*self.default_latency.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl RawExecutor for ScriptedExecutor {
    type Connection = ScriptedLink;

    async fn connect(&self) -> Result<ScriptedLink, AppError> {
        let latency = *self.connect_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::Connection("connection refused".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedLink {
            id: self.next_link.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn run(
        &self,
        conn: &ScriptedLink,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> Result<QueryResult, AppError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_for(sql);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(AppError::Execution(format!("relation in '{}' does not exist", sql)));
        }
        if options.explain {
            let plan = self.plan.lock().unwrap().clone();
            return Ok(QueryResult::new(
                plan.into_iter().map(|line| json!({ "QUERY PLAN": line })).collect(),
            ));
        }
        Ok(QueryResult::new(vec![json!({
            "sql": sql,
            "params": params,
            "link": conn.id,
            "run": run,
        })]))
    }

    async fn disconnect(&self, _conn: ScriptedLink) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
