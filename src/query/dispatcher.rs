//! Query Dispatcher
//!
//! Fans a batch out into one task per query and fans the outcomes back in:
//!
//! ```text
//!            ┌── task A: parse ─▶ execute ─▶ transform ──┐
//! batch ─────┼── task B: parse ─▶ execute ─▶ transform ──┼──▶ join loop ──▶ response
//!            └── task C: parse ✗ ────────────────────────┘
//! ```
//!
//! Every task shares the caller's execution context. A failure in one task
//! becomes that query's `Failure` outcome and never touches its siblings.
//! The response map is only written by the join loop.

use crate::metrics;
use crate::query::context::ExecutionContext;
use crate::query::error::QueryError;
use crate::query::executor::QueryExecutor;
use crate::query::result::{QueryDataResponse, QueryOutcome};
use crate::query::spec::QuerySpec;
use crate::query::transform::transform;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

// ============================================================================
// Requests
// ============================================================================

/// One query of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    /// Identifier the response is keyed by
    pub query_id: String,
    /// Opaque JSON payload
    pub payload: Vec<u8>,
}

impl BatchQuery {
    /// Create a batch entry
    pub fn new(query_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            query_id: query_id.into(),
            payload: payload.into(),
        }
    }
}

// ============================================================================
// Per-query state machine
// ============================================================================

/// Lifecycle of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Spawned, not started
    Pending,
    /// Decoding the payload
    Parsing,
    /// Running the warehouse job
    Executing,
    /// Draining rows into a series
    Transforming,
    /// Terminal: series produced
    Succeeded,
    /// Terminal: error recorded
    Failed,
}

impl QueryState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: QueryState) -> bool {
        use QueryState::*;
        matches!(
            (self, next),
            (Pending, Parsing)
                | (Parsing, Executing)
                | (Executing, Transforming)
                | (Transforming, Succeeded)
                | (Parsing | Executing | Transforming, Failed)
        )
    }

    /// True for `Succeeded` and `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryState::Succeeded | QueryState::Failed)
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryState::Pending => "pending",
            QueryState::Parsing => "parsing",
            QueryState::Executing => "executing",
            QueryState::Transforming => "transforming",
            QueryState::Succeeded => "succeeded",
            QueryState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Dispatcher configuration
// ============================================================================

/// Configuration for batch dispatch
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Per-query deadline on top of the caller's context (default: none)
    pub query_timeout: Option<Duration>,

    /// Bound on queries doing warehouse work at once; 0 = unbounded
    pub max_concurrent_queries: usize,
}

impl DispatcherConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-query deadline
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Bound concurrent warehouse work
    pub fn with_max_concurrent_queries(mut self, limit: usize) -> Self {
        self.max_concurrent_queries = limit;
        self
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs query batches concurrently
pub struct QueryDispatcher {
    executor: QueryExecutor,
    config: DispatcherConfig,
    permits: Option<Arc<Semaphore>>,
}

impl QueryDispatcher {
    /// Create a dispatcher with default configuration
    pub fn new(executor: QueryExecutor) -> Self {
        Self::with_config(executor, DispatcherConfig::default())
    }

    /// Create a dispatcher with custom configuration
    pub fn with_config(executor: QueryExecutor, config: DispatcherConfig) -> Self {
        let permits = (config.max_concurrent_queries > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_queries)));
        Self {
            executor,
            config,
            permits,
        }
    }

    /// Get dispatcher configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run every query in `queries` and collect one outcome per query id
    ///
    /// Returns once every task has finished. Completion order does not
    /// affect the result. A repeated query id keeps its first occurrence.
    ///
    /// Parsing never blocks and runs before the first context check, so a
    /// malformed payload reports `ParseError` even when `ctx` is already
    /// cancelled.
    pub async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        queries: Vec<BatchQuery>,
    ) -> QueryDataResponse {
        let mut response = QueryDataResponse::new();
        if queries.is_empty() {
            return response;
        }

        metrics::BATCHES_TOTAL.inc();
        info!(queries = queries.len(), "Dispatching query batch");
        let start = Instant::now();

        let mut tasks = JoinSet::new();
        let mut ids = HashMap::with_capacity(queries.len());
        let mut seen = HashSet::with_capacity(queries.len());

        for query in queries {
            if !seen.insert(query.query_id.clone()) {
                warn!(query_id = %query.query_id, "Duplicate query id in batch, skipping");
                continue;
            }

            let task = QueryTask {
                query_id: query.query_id.clone(),
                payload: query.payload,
                executor: self.executor.clone(),
                ctx: match self.config.query_timeout {
                    Some(timeout) => ctx.with_timeout(timeout),
                    None => ctx.clone(),
                },
                permits: self.permits.clone(),
                state: QueryState::Pending,
            };
            let handle = tasks.spawn(task.run());
            ids.insert(handle.id(), query.query_id);
        }

        // Single aggregation point for the response map.
        while let Some(joined) = tasks.join_next_with_id().await {
            let (query_id, outcome) = match joined {
                Ok((id, outcome)) => (ids.remove(&id), outcome),
                Err(join_err) => {
                    let query_id = ids.remove(&join_err.id());
                    let outcome = QueryOutcome::Failure(QueryError::internal(format!(
                        "query task aborted: {}",
                        join_err
                    )));
                    (query_id, outcome)
                },
            };

            match query_id {
                Some(query_id) => response.insert(query_id, outcome),
                None => error!("Finished query task has no registered query id"),
            }
        }

        info!(
            queries = response.len(),
            failed = response.error_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query batch complete"
        );
        response
    }
}

/// One query's journey through parse, execute and transform
struct QueryTask {
    query_id: String,
    payload: Vec<u8>,
    executor: QueryExecutor,
    ctx: ExecutionContext,
    permits: Option<Arc<Semaphore>>,
    state: QueryState,
}

impl QueryTask {
    async fn run(mut self) -> QueryOutcome {
        let start = Instant::now();
        let outcome = self.drive().await;

        let label = outcome.label();
        metrics::QUERIES_TOTAL.with_label_values(&[label]).inc();
        metrics::QUERY_DURATION
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        if let QueryOutcome::Failure(err) = &outcome {
            error!(query_id = %self.query_id, error = %err, "Query failed");
        }
        outcome
    }

    async fn drive(&mut self) -> QueryOutcome {
        self.enter(QueryState::Parsing);
        let spec = match QuerySpec::parse(&self.payload) {
            Ok(spec) => spec,
            Err(err) => return self.fail(err),
        };

        // Held until the series is built.
        let _permit = match self.permits.clone() {
            Some(permits) => {
                let acquired = self.ctx.run("queueing", permits.acquire_owned()).await;
                match acquired {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(closed)) => {
                        return self.fail(QueryError::internal(format!(
                            "query permits unavailable: {}",
                            closed
                        )))
                    },
                    Err(stopped) => return self.fail(stopped),
                }
            },
            None => None,
        };

        self.enter(QueryState::Executing);
        let executed = self.executor.execute(&self.ctx, &spec).await;
        let rows = match executed {
            Ok(rows) => rows,
            Err(err) => return self.fail(err),
        };

        self.enter(QueryState::Transforming);
        match transform(rows).await {
            Ok(series) => {
                self.enter(QueryState::Succeeded);
                debug!(query_id = %self.query_id, rows = series.len(), "Query succeeded");
                QueryOutcome::Success(series)
            },
            Err(err) => self.fail(err),
        }
    }

    fn enter(&mut self, next: QueryState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal query transition {} -> {}",
            self.state,
            next
        );
        debug!(query_id = %self.query_id, from = %self.state, to = %next, "Query state");
        self.state = next;
    }

    fn fail(&mut self, err: QueryError) -> QueryOutcome {
        self.enter(QueryState::Failed);
        QueryOutcome::Failure(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::{ExecutionCause, QueryErrorKind};
    use crate::warehouse::{CannedResult, MemoryWarehouse};
    use serde_json::json;

    fn payload(sql: &str) -> Vec<u8> {
        json!({"rawSql": sql, "project": "acme", "format": "time_series"})
            .to_string()
            .into_bytes()
    }

    fn dispatcher(warehouse: &MemoryWarehouse) -> QueryDispatcher {
        QueryDispatcher::new(QueryExecutor::new(Arc::new(warehouse.clone())))
    }

    #[test]
    fn test_state_transitions() {
        use QueryState::*;
        assert!(Pending.can_transition_to(Parsing));
        assert!(Parsing.can_transition_to(Failed));
        assert!(Executing.can_transition_to(Failed));
        assert!(Transforming.can_transition_to(Succeeded));

        assert!(!Pending.can_transition_to(Failed));
        assert!(!Executing.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Parsing));

        assert!(Succeeded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Transforming.is_terminal());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let warehouse = MemoryWarehouse::new();
        let response = dispatcher(&warehouse)
            .dispatch(&ExecutionContext::background(), Vec::new())
            .await;
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_batch() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert(
            "SELECT ok",
            CannedResult::rows(vec![
                json!({"time": "2024-01-01T00:00:00Z", "metric": 5}),
                json!({"time": "2024-01-01T00:01:00Z", "metric": 7}),
            ]),
        );
        warehouse.insert("SELECT broken", CannedResult::job_error("Table not found"));

        let response = dispatcher(&warehouse)
            .dispatch(
                &ExecutionContext::background(),
                vec![
                    BatchQuery::new("A", payload("SELECT ok")),
                    BatchQuery::new("B", b"{\"rawSql\": ".to_vec()),
                    BatchQuery::new("C", payload("SELECT broken")),
                ],
            )
            .await;

        assert_eq!(response.len(), 3);
        assert!(!response.get("A").unwrap().is_error());
        assert_eq!(response.get("A").unwrap().frames[0].row_count(), 2);
        assert!(response
            .get("B")
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .starts_with("ParseError"));
        assert!(response
            .get("C")
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .contains(&ExecutionCause::JobStatus.to_string()));
        assert_eq!(warehouse.open_clients(), 0);
    }

    #[tokio::test]
    async fn test_parse_error_precedes_cancellation() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert("SELECT ok", CannedResult::rows(vec![]));
        let (cancel, ctx) = ExecutionContext::new();
        cancel.cancel();

        let response = dispatcher(&warehouse)
            .dispatch(
                &ctx,
                vec![
                    BatchQuery::new("bad", b"{not json".to_vec()),
                    BatchQuery::new("good", payload("SELECT ok")),
                ],
            )
            .await;

        let error = |id: &str| response.get(id).unwrap().error.clone().unwrap();
        assert!(error("bad").starts_with(&QueryErrorKind::ParseError.to_string()));
        assert!(error("good").starts_with(&QueryErrorKind::Cancelled.to_string()));
        assert!(warehouse.submitted_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_query_id_keeps_first() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert("SELECT ok", CannedResult::rows(vec![]));

        let response = dispatcher(&warehouse)
            .dispatch(
                &ExecutionContext::background(),
                vec![
                    BatchQuery::new("A", payload("SELECT ok")),
                    BatchQuery::new("A", b"garbage".to_vec()),
                ],
            )
            .await;

        assert_eq!(response.len(), 1);
        assert!(!response.get("A").unwrap().is_error());
        assert_eq!(warehouse.submitted_jobs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert(
            "SELECT slow",
            CannedResult::rows(vec![]).with_delay(Duration::from_secs(600)),
        );
        warehouse.insert("SELECT fast", CannedResult::rows(vec![]));

        let dispatcher = QueryDispatcher::with_config(
            QueryExecutor::new(Arc::new(warehouse.clone())),
            DispatcherConfig::new().with_query_timeout(Duration::from_secs(1)),
        );
        let response = dispatcher
            .dispatch(
                &ExecutionContext::background(),
                vec![
                    BatchQuery::new("slow", payload("SELECT slow")),
                    BatchQuery::new("fast", payload("SELECT fast")),
                ],
            )
            .await;

        assert!(response
            .get("slow")
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .starts_with(&QueryErrorKind::Timeout.to_string()));
        assert!(!response.get("fast").unwrap().is_error());
        assert_eq!(warehouse.open_clients(), 0);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_still_answers_all() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert(
            "SELECT x",
            CannedResult::rows(vec![json!({"time": 0, "metric": 1})])
                .with_delay(Duration::from_millis(5)),
        );

        let dispatcher = QueryDispatcher::with_config(
            QueryExecutor::new(Arc::new(warehouse.clone())),
            DispatcherConfig::new().with_max_concurrent_queries(2),
        );
        let batch = (0..8)
            .map(|i| BatchQuery::new(format!("q{}", i), payload("SELECT x")))
            .collect();

        let response = dispatcher
            .dispatch(&ExecutionContext::background(), batch)
            .await;
        assert_eq!(response.len(), 8);
        assert_eq!(response.error_count(), 0);
    }
}
