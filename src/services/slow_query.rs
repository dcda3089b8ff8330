// Slow-query log and index advice
use crate::config::SlowQueryConfig;
use crate::models::{QueryResult, SlowQueryRecord};
use crate::validation::{ColumnRef, SqlInspector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Log is trimmed to `SLOW_LOG_TRIM_TO` once it grows past `SLOW_LOG_MAX`
const SLOW_LOG_MAX: usize = 1000;
const SLOW_LOG_TRIM_TO: usize = 500;

const FULL_SCAN_ADVICE: &str =
    "Full table scan detected: add an index on the columns used for filtering";
const SORT_ADVICE: &str =
    "Sort step detected: an index matching the ORDER BY columns can avoid sorting";
const HASH_JOIN_ADVICE: &str =
    "Hash join detected: index the join keys or narrow the joined row sets";

/// Plan fragments (lowercase) and the advice they trigger
const PLAN_PATTERNS: &[(&str, &str)] = &[
    ("seq scan", FULL_SCAN_ADVICE),
    ("full scan", FULL_SCAN_ADVICE),
    ("table scan", FULL_SCAN_ADVICE),
    ("sort", SORT_ADVICE),
    ("hash join", HASH_JOIN_ADVICE),
];

/// Advisory index recommendation derived from slow queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSuggestion {
    pub table: Option<String>,
    pub column: String,
    /// Slow queries filtering on this column
    pub occurrences: usize,
    pub average_duration_ms: f64,
    pub suggestion: String,
}

pub struct SlowQueryAnalyzer {
    threshold_ms: u64,
    explain_on_slow: bool,
    log: Mutex<VecDeque<SlowQueryRecord>>,
    known_indexes: Mutex<HashSet<ColumnRef>>,
}

impl SlowQueryAnalyzer {
    pub fn new(config: &SlowQueryConfig) -> Self {
        Self {
            threshold_ms: config.threshold_ms,
            explain_on_slow: config.explain_on_slow,
            log: Mutex::new(VecDeque::new()),
            known_indexes: Mutex::new(HashSet::new()),
        }
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    pub fn explain_on_slow(&self) -> bool {
        self.explain_on_slow
    }

    /// Strictly above the threshold counts as slow, sub-millisecond overruns included
    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > Duration::from_millis(self.threshold_ms)
    }

    fn lock_log(&self) -> MutexGuard<'_, VecDeque<SlowQueryRecord>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a slow query to the log
    pub fn record(&self, sql: &str, params: &[Value], duration_ms: u64) -> SlowQueryRecord {
        let record = SlowQueryRecord::new(sql.to_string(), params.to_vec(), duration_ms);

        tracing::warn!(
            query_id = %record.id,
            duration_ms,
            threshold_ms = self.threshold_ms,
            "Slow query: {}",
            sql
        );

        let mut log = self.lock_log();
        log.push_back(record.clone());
        if log.len() > SLOW_LOG_MAX {
            let excess = log.len() - SLOW_LOG_TRIM_TO;
            log.drain(..excess);
            tracing::debug!("Trimmed slow-query log to {} entries", log.len());
        }

        record
    }

    /// Most recent slow queries, newest first
    pub fn recent(&self, limit: usize) -> Vec<SlowQueryRecord> {
        self.lock_log().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_log().is_empty()
    }

    /// Tell the analyzer an index already exists so it is not suggested
    pub fn register_index(&self, table: &str, column: &str) {
        self.known_indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ColumnRef {
                table: Some(table.to_string()),
                column: column.to_string(),
            });
    }

    fn is_indexed(known: &HashSet<ColumnRef>, column: &ColumnRef) -> bool {
        match &column.table {
            Some(_) => known.contains(column),
            None => known.iter().any(|k| k.column == column.column),
        }
    }

    /// Scan logged slow queries for filtered columns without a known index
    ///
    /// Advisory only: nothing here touches the schema.
    pub fn suggest_missing_indexes(&self) -> Vec<IndexSuggestion> {
        let records: Vec<SlowQueryRecord> = self.lock_log().iter().cloned().collect();
        let known = self
            .known_indexes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        // column -> (occurrences, total duration)
        let mut seen: HashMap<ColumnRef, (usize, u64)> = HashMap::new();
        let mut order: Vec<ColumnRef> = Vec::new();
        for record in &records {
            for column in SqlInspector::where_columns(&record.sql) {
                if Self::is_indexed(&known, &column) {
                    continue;
                }
                let entry = seen.entry(column.clone()).or_insert_with(|| {
                    order.push(column.clone());
                    (0, 0)
                });
                entry.0 += 1;
                entry.1 += record.duration_ms;
            }
        }

        let mut suggestions: Vec<IndexSuggestion> = order
            .into_iter()
            .filter_map(|column| {
                let (occurrences, total_ms) = seen.get(&column).copied()?;
                let suggestion = match &column.table {
                    Some(table) => format!(
                        "CREATE INDEX idx_{}_{} ON {} ({})",
                        table.replace('.', "_"),
                        column.column,
                        table,
                        column.column
                    ),
                    None => format!(
                        "Consider an index on column '{}' (table could not be resolved)",
                        column.column
                    ),
                };
                Some(IndexSuggestion {
                    table: column.table,
                    column: column.column,
                    occurrences,
                    average_duration_ms: total_ms as f64 / occurrences as f64,
                    suggestion,
                })
            })
            .collect();

        // Stable sort keeps first-seen order among ties
        suggestions.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        suggestions
    }

    /// Turn execution-plan output into human-readable advice
    pub fn analyze_plan(plan: &QueryResult) -> Vec<String> {
        let text = plan
            .rows
            .iter()
            .map(plan_line)
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();

        let mut advice: Vec<String> = Vec::new();
        for (pattern, message) in PLAN_PATTERNS {
            if text.contains(pattern) && !advice.iter().any(|a| a == message) {
                advice.push(message.to_string());
            }
        }
        advice
    }
}

fn plan_line(row: &Value) -> String {
    match row {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .values()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analyzer(threshold_ms: u64) -> SlowQueryAnalyzer {
        SlowQueryAnalyzer::new(&SlowQueryConfig {
            threshold_ms,
            explain_on_slow: false,
        })
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let analyzer = analyzer(100);
        assert!(!analyzer.is_slow(Duration::from_millis(99)));
        assert!(!analyzer.is_slow(Duration::from_millis(100)));
        assert!(analyzer.is_slow(Duration::from_millis(101)));
    }

    #[test]
    fn test_fractional_overrun_is_slow() {
        let analyzer = analyzer(30);
        assert!(analyzer.is_slow(Duration::from_micros(30_900)));
        assert!(analyzer.is_slow(Duration::from_micros(30_001)));
    }

    #[test]
    fn test_record_appends() {
        let analyzer = analyzer(100);
        let record = analyzer.record("SELECT * FROM users", &[json!(1)], 250);
        assert_eq!(record.duration_ms, 250);
        assert_eq!(analyzer.len(), 1);
        assert_eq!(analyzer.recent(10)[0].id, record.id);
    }

    #[test]
    fn test_log_trims_to_most_recent() {
        let analyzer = analyzer(0);
        for n in 0..=SLOW_LOG_MAX {
            analyzer.record(&format!("SELECT {}", n), &[], 5);
        }
        // 1001 entries exceeded the bound: keep the newest 500
        assert_eq!(analyzer.len(), SLOW_LOG_TRIM_TO);
        let recent = analyzer.recent(1);
        assert_eq!(recent[0].sql, format!("SELECT {}", SLOW_LOG_MAX));
        let oldest = analyzer.recent(SLOW_LOG_TRIM_TO);
        assert_eq!(
            oldest.last().map(|r| r.sql.clone()),
            Some(format!("SELECT {}", SLOW_LOG_MAX + 1 - SLOW_LOG_TRIM_TO))
        );
    }

    #[test]
    fn test_log_at_bound_is_not_trimmed() {
        let analyzer = analyzer(0);
        for n in 0..SLOW_LOG_MAX {
            analyzer.record(&format!("SELECT {}", n), &[], 5);
        }
        assert_eq!(analyzer.len(), SLOW_LOG_MAX);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let analyzer = analyzer(0);
        analyzer.record("SELECT 1", &[], 5);
        analyzer.record("SELECT 2", &[], 5);
        let recent = analyzer.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sql, "SELECT 2");
    }

    #[test]
    fn test_suggest_missing_indexes() {
        let analyzer = analyzer(0);
        analyzer.record("SELECT * FROM users WHERE email = $1", &[json!("a@b.c")], 300);
        analyzer.record("SELECT * FROM users WHERE email = $1", &[json!("d@e.f")], 500);
        analyzer.record("SELECT * FROM orders WHERE status = 'open'", &[], 200);

        let suggestions = analyzer.suggest_missing_indexes();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].column, "email");
        assert_eq!(suggestions[0].table.as_deref(), Some("users"));
        assert_eq!(suggestions[0].occurrences, 2);
        assert!((suggestions[0].average_duration_ms - 400.0).abs() < 1e-9);
        assert_eq!(suggestions[0].suggestion, "CREATE INDEX idx_users_email ON users (email)");
        assert_eq!(suggestions[1].column, "status");
    }

    #[test]
    fn test_registered_index_is_not_suggested() {
        let analyzer = analyzer(0);
        analyzer.register_index("users", "email");
        analyzer.record("SELECT * FROM users WHERE email = $1", &[], 300);
        assert!(analyzer.suggest_missing_indexes().is_empty());
    }

    #[test]
    fn test_analyze_plan() {
        let plan = QueryResult::new(vec![
            json!({"QUERY PLAN": "Sort  (cost=10.1..10.2 rows=5 width=40)"}),
            json!({"QUERY PLAN": "  ->  Hash Join  (cost=1.1..9.9 rows=5 width=40)"}),
            json!({"QUERY PLAN": "        ->  Seq Scan on users  (cost=0.0..1.5 rows=50 width=40)"}),
        ]);
        let advice = SlowQueryAnalyzer::analyze_plan(&plan);
        assert_eq!(advice, vec![FULL_SCAN_ADVICE, SORT_ADVICE, HASH_JOIN_ADVICE]);
    }

    #[test]
    fn test_analyze_plan_with_index_scan() {
        let plan = QueryResult::new(vec![json!({
            "QUERY PLAN": "Index Scan using users_pkey on users  (cost=0.1..8.2 rows=1 width=40)"
        })]);
        assert!(SlowQueryAnalyzer::analyze_plan(&plan).is_empty());
    }
}
