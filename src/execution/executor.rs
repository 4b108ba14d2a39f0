//! Query Executor
//!
//! Repairs a candidate query against the schema, then runs it in a fresh
//! engine session with the dataset registered as `dataset`. Engine errors,
//! timeouts and worker panics never escape: they come back as
//! [`QueryOutcome::Failure`] and are logged.

use crate::execution::engine::{AnalyticalEngine, PolarsSqlSession};
use crate::execution::result::{FailureKind, QueryFailure, QueryOutcome, ResultTable};
use crate::repair::QueryRepairer;
use crate::schema::SchemaDescriptor;
use crate::synthesizer::RELATION_NAME;
use polars::prelude::*;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub struct QueryExecutor {
    repairer: QueryRepairer,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(repairer: QueryRepairer, timeout: Duration) -> Self {
        Self { repairer, timeout }
    }

    pub fn repairer(&self) -> &QueryRepairer {
        &self.repairer
    }

    /// Repair and execute on a blocking worker, bounded by the timeout.
    pub async fn execute(
        &self,
        dataset: &DataFrame,
        query: &str,
        schema: &SchemaDescriptor,
    ) -> QueryOutcome {
        let repaired = self.repairer.repair(query, schema);
        self.execute_repaired(dataset, repaired).await
    }

    /// Execute an already repaired statement.
    ///
    /// On timeout the call returns at once, but the blocking worker cannot be
    /// interrupted: it runs the statement to completion in the background and
    /// its session is released only then. Its result is discarded.
    pub async fn execute_repaired(&self, dataset: &DataFrame, sql: String) -> QueryOutcome {
        // Shares column buffers with the caller's frame
        let snapshot = dataset.clone();
        self.run_on_worker(move || run_in_session(snapshot, &sql)).await
    }

    async fn run_on_worker<F>(&self, job: F) -> QueryOutcome
    where
        F: FnOnce() -> QueryOutcome + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(job);

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                error!("query worker aborted: {}", join_err);
                QueryOutcome::Failure(QueryFailure::new(
                    FailureKind::Aborted,
                    format!("query worker aborted: {}", join_err),
                ))
            }
            Err(_) => {
                warn!(
                    "query execution timed out after {:?}; worker left to finish in the background",
                    self.timeout
                );
                QueryOutcome::Failure(QueryFailure::new(
                    FailureKind::Timeout,
                    format!("query execution timed out after {:?}", self.timeout),
                ))
            }
        }
    }

    /// Synchronous variant for callers without a runtime. No timeout.
    pub fn execute_blocking(
        &self,
        dataset: &DataFrame,
        query: &str,
        schema: &SchemaDescriptor,
    ) -> QueryOutcome {
        let repaired = self.repairer.repair(query, schema);
        run_in_session(dataset.clone(), &repaired)
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(QueryRepairer::default(), Duration::from_secs(30))
    }
}

/// Repair, execute, and collapse any failure into an empty frame.
pub fn execute_sql_on_df(df: &DataFrame, sql: &str, schema: &SchemaDescriptor) -> DataFrame {
    QueryExecutor::default()
        .execute_blocking(df, sql, schema)
        .into_frame_or_empty()
}

fn run_in_session(dataset: DataFrame, sql: &str) -> QueryOutcome {
    let start = Instant::now();
    let mut session = PolarsSqlSession::new();
    session.register(RELATION_NAME, dataset);
    let result = session.execute(sql);
    drop(session);

    match result {
        Ok(frame) => {
            info!(
                "query returned {} rows in {}ms",
                frame.height(),
                start.elapsed().as_millis()
            );
            QueryOutcome::Success(ResultTable::new(frame))
        }
        Err(e) => {
            error!("Error executing SQL query `{}`: {}", sql, e);
            QueryOutcome::Failure(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDescriptor;

    fn people() -> (DataFrame, SchemaDescriptor) {
        let df = df![
            "name" => ["ana", "bo", "cy", "di"],
            "age" => [25i64, 34, 41, 19],
            "region" => ["west", "east", "west", "north"]
        ]
        .unwrap();
        let schema = SchemaDescriptor::from_frame(&df).unwrap();
        (df, schema)
    }

    #[tokio::test]
    async fn test_repaired_query_executes() {
        let (df, schema) = people();
        let executor = QueryExecutor::default();

        let outcome = executor
            .execute(&df, "SELECT NAME FROM dataset WHERE regoin = 'west' AND AGE > 30;", &schema)
            .await;

        let table = outcome.table().expect("query should succeed");
        assert_eq!(table.columns(), vec!["name"]);
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.to_json_rows().unwrap()[0]["name"], serde_json::json!("cy"));
    }

    #[tokio::test]
    async fn test_zero_row_query_is_success_with_same_columns() {
        let (df, schema) = people();
        let outcome = QueryExecutor::default()
            .execute(&df, "SELECT * FROM dataset WHERE 1=0;", &schema)
            .await;

        let table = outcome.table().expect("empty result is not a failure");
        assert!(table.is_empty());
        assert_eq!(table.columns(), vec!["name", "age", "region"]);
    }

    #[tokio::test]
    async fn test_malformed_query_is_contained() {
        let (df, schema) = people();
        let outcome = QueryExecutor::default()
            .execute(&df, "SELECT FROM FROM", &schema)
            .await;

        let failure = outcome.failure().expect("should be a failure");
        assert_eq!(failure.kind, FailureKind::Execution);
        assert_eq!(outcome.into_frame_or_empty().height(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_are_isolated() {
        let (df, schema) = people();
        let executor = QueryExecutor::default();

        let first = executor
            .execute(&df, "SELECT name FROM dataset WHERE age < 30", &schema)
            .await;
        let second = executor
            .execute(&df, "SELECT region FROM dataset", &schema)
            .await;

        assert_eq!(first.table().unwrap().row_count(), 2);
        assert_eq!(second.table().unwrap().columns(), vec!["region"]);
        assert_eq!(second.table().unwrap().row_count(), 4);
    }

    #[tokio::test]
    async fn test_slow_query_times_out() {
        let values: Vec<i64> = (0..3000).collect();
        let df = df!["value" => values].unwrap();
        let schema = SchemaDescriptor::from_frame(&df).unwrap();
        let executor = QueryExecutor::new(QueryRepairer::default(), Duration::from_nanos(1));

        let outcome = executor
            .execute(&df, "SELECT * FROM dataset a CROSS JOIN dataset b", &schema)
            .await;

        let failure = outcome.failure().expect("should time out");
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.reason.contains("1ns"), "reason: {}", failure.reason);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_aborted() {
        let executor = QueryExecutor::default();

        let outcome = executor
            .run_on_worker(|| panic!("worker blew up"))
            .await;

        assert_eq!(outcome.failure().unwrap().kind, FailureKind::Aborted);
    }

    #[test]
    fn test_execute_sql_on_df_collapses_failures() {
        let (df, schema) = people();

        let ok = execute_sql_on_df(&df, "SELECT * FROM dataset WHERE age > 40", &schema);
        assert_eq!(ok.height(), 1);

        let failed = execute_sql_on_df(&df, "SELECT * FROM nowhere", &schema);
        assert_eq!(failed.height(), 0);
        assert_eq!(failed.width(), 0);
    }
}
