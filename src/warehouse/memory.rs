//! In-memory warehouse backend
//!
//! Answers jobs from canned results keyed by SQL text. Intended for:
//! - **Unit and integration tests** without warehouse credentials
//! - **Replaying** recorded batches from a JSON fixture file
//!
//! It mimics the failure surface of a real warehouse: projects that refuse
//! connections, rejected submissions, failed waits, terminal job errors,
//! region mismatches and cursors that break part way through. It also
//! counts opened and closed clients so callers can check that every client
//! is released.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use warehouse_series::warehouse::{CannedResult, MemoryWarehouse};
//!
//! let warehouse = MemoryWarehouse::new();
//! warehouse.insert(
//!     "SELECT time, metric FROM ds.t",
//!     CannedResult::rows(vec![json!({"time": "2024-01-01T00:00:00Z", "metric": 5})]),
//! );
//! ```

use super::{JobRequest, JobStatus, RowCursor, WarehouseClient, WarehouseConnector, WarehouseJob};
use crate::error::{Error, WarehouseError};
use crate::types::RawRow;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Canned answer for one SQL text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CannedResult {
    /// Rows returned in order
    pub rows: Vec<RawRow>,

    /// Region the referenced dataset lives in. A job submitted with a
    /// different non-empty location fails with a job-status error.
    pub location: Option<String>,

    /// Reject the submission with this message
    pub submit_error: Option<String>,

    /// Fail the wait with this message
    pub wait_error: Option<String>,

    /// Finish the job with this error status
    pub job_error: Option<String>,

    /// Break the cursor after this many rows
    pub read_error_after: Option<usize>,

    /// Time the job takes to complete, in milliseconds
    pub delay_ms: u64,
}

impl CannedResult {
    /// Successful job returning `rows`; non-object values are skipped
    pub fn rows(rows: Vec<serde_json::Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Job that finishes with an error status
    pub fn job_error(reason: impl Into<String>) -> Self {
        Self {
            job_error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Job whose completion wait fails
    pub fn wait_error(message: impl Into<String>) -> Self {
        Self {
            wait_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Job rejected at submission
    pub fn submit_error(message: impl Into<String>) -> Self {
        Self {
            submit_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Pin the dataset region
    pub fn in_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Delay job completion
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    /// Break the cursor after `rows` rows
    pub fn with_read_error_after(mut self, rows: usize) -> Self {
        self.read_error_after = Some(rows);
        self
    }
}

/// Fixture file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseFixtures {
    /// Canned results keyed by SQL text
    pub queries: HashMap<String, CannedResult>,

    /// Projects whose client construction fails, with the reason
    pub unreachable_projects: HashMap<String, String>,
}

impl WarehouseFixtures {
    /// Load fixtures from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Serialization(format!("Failed to parse fixtures {}: {}", path.display(), e))
        })
    }
}

#[derive(Default)]
struct Inner {
    fixtures: RwLock<WarehouseFixtures>,
    submitted: RwLock<Vec<(String, JobRequest)>>,
    open_clients: AtomicUsize,
    closed_clients: AtomicUsize,
    next_job: AtomicU64,
}

/// Warehouse backed by canned results
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Inner>,
}

impl MemoryWarehouse {
    /// Create an empty warehouse
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a warehouse from fixtures
    pub fn from_fixtures(fixtures: WarehouseFixtures) -> Self {
        let warehouse = Self::new();
        *warehouse.inner.fixtures.write() = fixtures;
        warehouse
    }

    /// Register the answer for a SQL text
    pub fn insert(&self, sql: impl Into<String>, result: CannedResult) {
        self.inner.fixtures.write().queries.insert(sql.into(), result);
    }

    /// Make client construction fail for `project`
    pub fn refuse_project(&self, project: impl Into<String>, reason: impl Into<String>) {
        self.inner
            .fixtures
            .write()
            .unreachable_projects
            .insert(project.into(), reason.into());
    }

    /// Clients connected and not yet closed
    pub fn open_clients(&self) -> usize {
        self.inner.open_clients.load(Ordering::SeqCst)
    }

    /// Clients closed so far
    pub fn closed_clients(&self) -> usize {
        self.inner.closed_clients.load(Ordering::SeqCst)
    }

    /// Every `(project, request)` submitted so far, in submission order
    pub fn submitted_jobs(&self) -> Vec<(String, JobRequest)> {
        self.inner.submitted.read().clone()
    }
}

#[async_trait]
impl WarehouseConnector for MemoryWarehouse {
    fn backend_id(&self) -> &str {
        "memory"
    }

    async fn connect(&self, project: &str) -> Result<Box<dyn WarehouseClient>, WarehouseError> {
        if let Some(reason) = self.inner.fixtures.read().unreachable_projects.get(project) {
            return Err(WarehouseError::Connect {
                project: project.to_string(),
                message: reason.clone(),
            });
        }

        self.inner.open_clients.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryClient {
            inner: Arc::clone(&self.inner),
            project: project.to_string(),
            closed: false,
        }))
    }
}

struct MemoryClient {
    inner: Arc<Inner>,
    project: String,
    closed: bool,
}

#[async_trait]
impl WarehouseClient for MemoryClient {
    async fn submit(
        &mut self,
        request: JobRequest,
    ) -> Result<Box<dyn WarehouseJob>, WarehouseError> {
        if self.closed {
            return Err(WarehouseError::Submit("client is closed".to_string()));
        }

        self.inner
            .submitted
            .write()
            .push((self.project.clone(), request.clone()));

        let canned = self
            .inner
            .fixtures
            .read()
            .queries
            .get(&request.sql)
            .cloned()
            .ok_or_else(|| {
                WarehouseError::Submit(format!("Syntax error: no table answers '{}'", request.sql))
            })?;

        if let Some(message) = &canned.submit_error {
            return Err(WarehouseError::Submit(message.clone()));
        }

        let id = self.inner.next_job.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryJob {
            job_id: format!("job_{}_{}", self.project, id),
            request,
            canned,
        }))
    }

    fn close(&mut self) -> Result<(), WarehouseError> {
        if self.closed {
            return Err(WarehouseError::Close("client already closed".to_string()));
        }
        self.closed = true;
        self.inner.open_clients.fetch_sub(1, Ordering::SeqCst);
        self.inner.closed_clients.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryJob {
    job_id: String,
    request: JobRequest,
    canned: CannedResult,
}

#[async_trait]
impl WarehouseJob for MemoryJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    async fn wait(&mut self) -> Result<JobStatus, WarehouseError> {
        if self.canned.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.canned.delay_ms)).await;
        }

        if let Some(message) = &self.canned.wait_error {
            return Err(WarehouseError::Wait(message.clone()));
        }

        if let Some(dataset_location) = &self.canned.location {
            let requested = &self.request.location;
            if !requested.is_empty() && !requested.eq_ignore_ascii_case(dataset_location) {
                return Ok(JobStatus::Failed(format!(
                    "Not found: dataset was not found in location {}",
                    requested
                )));
            }
        }

        Ok(match &self.canned.job_error {
            Some(reason) => JobStatus::Failed(reason.clone()),
            None => JobStatus::Done,
        })
    }

    async fn read(self: Box<Self>) -> Result<Box<dyn RowCursor>, WarehouseError> {
        let job = *self;
        Ok(Box::new(MemoryCursor {
            rows: job.canned.rows.into_iter().collect(),
            fail_after: job.canned.read_error_after,
            served: 0,
        }))
    }
}

struct MemoryCursor {
    rows: VecDeque<RawRow>,
    fail_after: Option<usize>,
    served: usize,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    async fn next_row(&mut self) -> Result<Option<RawRow>, WarehouseError> {
        if self.fail_after == Some(self.served) {
            return Err(WarehouseError::Read(format!(
                "connection reset after {} rows",
                self.served
            )));
        }
        let row = self.rows.pop_front();
        if row.is_some() {
            self.served += 1;
        }
        Ok(row)
    }
}
