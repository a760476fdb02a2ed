//! Warehouse collaborator traits
//!
//! The query executor talks to the warehouse only through these traits:
//!
//! ```text
//! WarehouseConnector ──connect(project)──▶ WarehouseClient
//!                                             │ submit(JobRequest)
//!                                             ▼
//!                                         WarehouseJob ──wait()──▶ JobStatus
//!                                             │ read()
//!                                             ▼
//!                                         RowCursor ──next_row()──▶ RawRow …
//! ```
//!
//! Every call that may block is async so the executor can race it against
//! the execution context. Clients are released through [`ClientGuard`].

pub mod memory;

use crate::error::WarehouseError;
use crate::types::RawRow;
use async_trait::async_trait;
use tracing::warn;

pub use memory::{CannedResult, MemoryWarehouse, WarehouseFixtures};

/// One SQL job submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// SQL text submitted verbatim
    pub sql: String,
    /// Execution region; must match the dataset's region. Empty lets the
    /// warehouse pick.
    pub location: String,
}

/// Terminal job status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Job finished and results are readable
    Done,
    /// Job finished with an error reported by the warehouse
    Failed(String),
}

impl JobStatus {
    /// Convert into a result, naming the job in the error
    pub fn into_result(self, job_id: &str) -> Result<(), WarehouseError> {
        match self {
            JobStatus::Done => Ok(()),
            JobStatus::Failed(reason) => Err(WarehouseError::JobFailed {
                job_id: job_id.to_string(),
                reason,
            }),
        }
    }
}

/// Builds project-scoped warehouse clients
#[async_trait]
pub trait WarehouseConnector: Send + Sync + 'static {
    /// Backend name for logging
    fn backend_id(&self) -> &str;

    /// Construct a client scoped to `project`
    async fn connect(&self, project: &str) -> Result<Box<dyn WarehouseClient>, WarehouseError>;
}

/// A client connection scoped to one project
#[async_trait]
pub trait WarehouseClient: Send {
    /// Submit a SQL job
    async fn submit(&mut self, request: JobRequest)
        -> Result<Box<dyn WarehouseJob>, WarehouseError>;

    /// Release the connection. Called exactly once.
    fn close(&mut self) -> Result<(), WarehouseError>;
}

/// A submitted job
#[async_trait]
pub trait WarehouseJob: Send {
    /// Warehouse-assigned job id
    fn job_id(&self) -> &str;

    /// Wait until the job reaches a terminal status
    async fn wait(&mut self) -> Result<JobStatus, WarehouseError>;

    /// Open a forward-only cursor over the job's result rows
    async fn read(self: Box<Self>) -> Result<Box<dyn RowCursor>, WarehouseError>;
}

/// Forward-only cursor over result rows
#[async_trait]
pub trait RowCursor: Send {
    /// Fetch the next row; `Ok(None)` once exhausted
    async fn next_row(&mut self) -> Result<Option<RawRow>, WarehouseError>;
}

/// Owns a client and closes it exactly once
///
/// Closing happens on [`ClientGuard::release`] or, failing that, on drop, so
/// every exit path (success, error, cancellation, panic unwinding) releases
/// the connection.
pub struct ClientGuard {
    client: Option<Box<dyn WarehouseClient>>,
    project: String,
}

impl ClientGuard {
    /// Take ownership of a freshly connected client
    pub fn new(client: Box<dyn WarehouseClient>, project: impl Into<String>) -> Self {
        Self {
            client: Some(client),
            project: project.into(),
        }
    }

    /// Borrow the client; `None` once released
    pub fn client(&mut self) -> Option<&mut (dyn WarehouseClient + 'static)> {
        self.client.as_deref_mut()
    }

    /// Close the client now
    pub fn release(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close() {
                warn!(project = %self.project, error = %e, "Failed to close warehouse client");
            }
        }
    }

    /// True once the client has been closed
    pub fn is_released(&self) -> bool {
        self.client.is_none()
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ClientGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientGuard")
            .field("project", &self.project)
            .field("released", &self.is_released())
            .finish()
    }
}
