//! Query error types
//!
//! Provides structured error handling for every stage a query goes through:
//! payload parsing, warehouse execution, and result transformation.

use crate::error::WarehouseError;
use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ParseError, message)
    }

    /// Create an execution error tagged with its cause
    pub fn execution(cause: ExecutionCause, message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError(cause), message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// Execution cause, if this is an execution error
    pub fn cause(&self) -> Option<ExecutionCause> {
        match self.kind {
            QueryErrorKind::ExecutionError(cause) => Some(cause),
            _ => None,
        }
    }

    /// True for errors raised because the execution context stopped the query
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind, QueryErrorKind::Cancelled | QueryErrorKind::Timeout)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<WarehouseError> for QueryError {
    fn from(err: WarehouseError) -> Self {
        let cause = match &err {
            WarehouseError::Connect { .. } | WarehouseError::Close(_) => {
                ExecutionCause::ClientConstruction
            },
            WarehouseError::Submit(_) => ExecutionCause::Submission,
            WarehouseError::Wait(_) => ExecutionCause::Wait,
            WarehouseError::JobFailed { .. } => ExecutionCause::JobStatus,
            WarehouseError::Read(_) => ExecutionCause::RowDecode,
        };
        QueryError::execution(cause, err.to_string()).with_source(err)
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Query payload did not decode into a query spec
    ParseError,
    /// Warehouse work failed
    ExecutionError(ExecutionCause),
    /// Execution context was cancelled mid-wait or mid-iteration
    Cancelled,
    /// Execution context deadline elapsed
    Timeout,
    /// Internal error (task panicked, unexpected state)
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ParseError => write!(f, "ParseError"),
            QueryErrorKind::ExecutionError(cause) => write!(f, "ExecutionError({})", cause),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Which step of warehouse execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionCause {
    /// Building the project-scoped client
    ClientConstruction,
    /// Submitting the SQL job
    Submission,
    /// Waiting for job completion
    Wait,
    /// Job finished with a non-success status
    JobStatus,
    /// Opening the cursor or decoding a row
    RowDecode,
}

impl fmt::Display for ExecutionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionCause::ClientConstruction => "client",
            ExecutionCause::Submission => "submission",
            ExecutionCause::Wait => "wait",
            ExecutionCause::JobStatus => "job-status",
            ExecutionCause::RowDecode => "row-decode",
        };
        f.write_str(name)
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = QueryError::parse("expected value at line 1 column 2");
        assert_eq!(err.kind, QueryErrorKind::ParseError);
        assert!(err.message.contains("line 1"));
        assert!(err.cause().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::execution(ExecutionCause::JobStatus, "dataset not found in EU");
        let display = format!("{}", err);
        assert!(display.contains("ExecutionError(job-status)"));
        assert!(display.contains("EU"));
    }

    #[test]
    fn test_error_with_source() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "fixture missing");
        let err = QueryError::internal("failed to load fixture").with_source(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_warehouse_error_mapping() {
        let cases = [
            (
                WarehouseError::Connect {
                    project: "p".into(),
                    message: "no credentials".into(),
                },
                ExecutionCause::ClientConstruction,
            ),
            (WarehouseError::Submit("bad sql".into()), ExecutionCause::Submission),
            (WarehouseError::Wait("deadline".into()), ExecutionCause::Wait),
            (
                WarehouseError::JobFailed {
                    job_id: "j".into(),
                    reason: "location mismatch".into(),
                },
                ExecutionCause::JobStatus,
            ),
            (WarehouseError::Read("page token".into()), ExecutionCause::RowDecode),
        ];

        for (err, expected) in cases {
            let query_err = QueryError::from(err);
            assert_eq!(query_err.cause(), Some(expected));
        }
    }

    #[test]
    fn test_cancellation_flavors() {
        assert!(QueryError::cancelled("stop").is_cancellation());
        assert!(QueryError::timeout("late").is_cancellation());
        assert!(!QueryError::parse("bad").is_cancellation());
    }
}
