//! Warehouse Query Executor
//!
//! Runs one [`QuerySpec`] as a warehouse SQL job and exposes the result rows
//! as a lazy, forward-only [`RowSequence`].
//!
//! # Flow
//!
//! ```text
//! connect(project) ──▶ submit(sql, location) ──▶ wait ──▶ status ──▶ read
//!        │                    │                   │         │          │
//!        └──── every step races the execution context ─────┘          ▼
//!                                                               RowSequence
//! ```
//!
//! The client is held by a [`ClientGuard`] from the moment it is built. It is
//! released when the sequence is exhausted or fails, and on drop otherwise,
//! so no exit path leaks a connection. Nothing here retries.

use crate::query::context::ExecutionContext;
use crate::query::error::{ExecutionCause, QueryError, QueryResult};
use crate::query::spec::QuerySpec;
use crate::types::WarehouseRow;
use crate::warehouse::{ClientGuard, JobRequest, RowCursor, WarehouseConnector};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Defaults applied when a spec leaves a field empty
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Project used when the spec has none
    pub default_project: Option<String>,

    /// Location used when the spec has none
    pub default_location: Option<String>,
}

impl ExecutorConfig {
    /// Create a config with no defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback project
    pub fn with_default_project(mut self, project: impl Into<String>) -> Self {
        self.default_project = Some(project.into());
        self
    }

    /// Set the fallback location
    pub fn with_default_location(mut self, location: impl Into<String>) -> Self {
        self.default_location = Some(location.into());
        self
    }
}

/// Submits query specs to the warehouse
#[derive(Clone)]
pub struct QueryExecutor {
    connector: Arc<dyn WarehouseConnector>,
    config: ExecutorConfig,
}

impl QueryExecutor {
    /// Create an executor over a warehouse backend
    pub fn new(connector: Arc<dyn WarehouseConnector>) -> Self {
        Self::with_config(connector, ExecutorConfig::default())
    }

    /// Create an executor with explicit defaults
    pub fn with_config(connector: Arc<dyn WarehouseConnector>, config: ExecutorConfig) -> Self {
        Self { connector, config }
    }

    /// Get executor configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn project_for<'a>(&'a self, spec: &'a QuerySpec) -> &'a str {
        if spec.project.is_empty() {
            self.config.default_project.as_deref().unwrap_or("")
        } else {
            &spec.project
        }
    }

    fn location_for<'a>(&'a self, spec: &'a QuerySpec) -> &'a str {
        if spec.location.is_empty() {
            self.config.default_location.as_deref().unwrap_or("")
        } else {
            &spec.location
        }
    }

    /// Run `spec.raw_sql` and open a cursor over its rows
    ///
    /// Region/dataset consistency is left to the warehouse: a mismatched
    /// location comes back as a job-status failure.
    ///
    /// # Errors
    ///
    /// * `ExecutionError` tagged with the failing step
    /// * `Cancelled` / `Timeout` when `ctx` stops first
    pub async fn execute(&self, ctx: &ExecutionContext, spec: &QuerySpec) -> QueryResult<RowSequence> {
        let project = self.project_for(spec).to_string();
        let request = JobRequest {
            sql: spec.raw_sql.clone(),
            location: self.location_for(spec).to_string(),
        };
        let start = Instant::now();

        debug!(
            query_id = %spec.query_id,
            backend = self.connector.backend_id(),
            project = %project,
            location = %request.location,
            "Connecting to warehouse"
        );

        let client = ctx
            .run("client construction", self.connector.connect(&project))
            .await??;
        let mut guard = ClientGuard::new(client, project.clone());

        let client = guard
            .client()
            .ok_or_else(|| QueryError::internal("warehouse client released before submission"))?;
        let mut job = ctx.run("job submission", client.submit(request)).await??;
        let job_id = job.job_id().to_string();

        debug!(query_id = %spec.query_id, job_id = %job_id, "Warehouse job submitted");

        let status = ctx.run("job wait", job.wait()).await??;
        status.into_result(&job_id)?;

        let cursor = ctx.run("result read", job.read()).await??;

        info!(
            query_id = %spec.query_id,
            job_id = %job_id,
            project = %project,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Warehouse job completed"
        );

        Ok(RowSequence {
            cursor: Some(cursor),
            guard,
            ctx: ctx.clone(),
            job_id,
            rows_read: 0,
        })
    }
}

/// Lazy, single-pass sequence of result rows
///
/// [`RowSequence::next`] yields `Ok(Some(row))` per row, `Ok(None)` once
/// exhausted, or an error that ends the sequence. After the end (either
/// kind) it keeps returning `Ok(None)` and the client has been released.
pub struct RowSequence {
    // Declared before `guard` so the cursor drops before its client closes.
    cursor: Option<Box<dyn RowCursor>>,
    guard: ClientGuard,
    ctx: ExecutionContext,
    job_id: String,
    rows_read: usize,
}

impl RowSequence {
    /// Fetch and decode the next row
    pub async fn next(&mut self) -> QueryResult<Option<WarehouseRow>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let result = self.ctx.run("row iteration", cursor.next_row()).await;
        let fetched = match result {
            Ok(Ok(row)) => row,
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(stopped) => return Err(self.fail(stopped)),
        };

        let Some(raw) = fetched else {
            debug!(job_id = %self.job_id, rows = self.rows_read, "Result cursor exhausted");
            self.finish();
            return Ok(None);
        };

        match WarehouseRow::decode(raw) {
            Ok(row) => {
                self.rows_read += 1;
                trace!(job_id = %self.job_id, time = %row.time, value = row.value, "Row");
                Ok(Some(row))
            },
            Err(e) => {
                let err = QueryError::execution(
                    ExecutionCause::RowDecode,
                    format!("row {} of job {}: {}", self.rows_read, self.job_id, e),
                )
                .with_source(e);
                Err(self.fail(err))
            },
        }
    }

    /// Rows decoded so far
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Warehouse job the rows come from
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// True once the sequence has ended and released its client
    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    fn finish(&mut self) {
        self.cursor = None;
        self.guard.release();
    }

    fn fail(&mut self, err: QueryError) -> QueryError {
        debug!(job_id = %self.job_id, rows = self.rows_read, error = %err, "Result cursor failed");
        self.finish();
        err
    }
}

impl std::fmt::Debug for RowSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSequence")
            .field("job_id", &self.job_id)
            .field("rows_read", &self.rows_read)
            .field("finished", &self.is_finished())
            .finish()
    }
}
