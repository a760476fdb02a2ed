//! Error types for the warehouse series crate

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Warehouse collaborator error
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General error
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Errors reported by a warehouse backend
///
/// Each variant corresponds to one step of running a job. The query executor
/// maps them onto execution causes so callers can tell a rejected submission
/// from a job that ran and failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    /// Could not build a client for the project
    #[error("client construction failed for project '{project}': {message}")]
    Connect {
        /// Project the client was scoped to
        project: String,
        /// Backend-reported reason
        message: String,
    },

    /// The job was rejected at submission time
    #[error("job submission failed: {0}")]
    Submit(String),

    /// Waiting on the job failed before a terminal status was known
    #[error("job wait failed: {0}")]
    Wait(String),

    /// The job finished with an error status
    #[error("job {job_id} failed: {reason}")]
    JobFailed {
        /// Warehouse job identifier
        job_id: String,
        /// Terminal status reason
        reason: String,
    },

    /// The result cursor could not be opened or advanced
    #[error("result read failed: {0}")]
    Read(String),

    /// Releasing the client failed
    #[error("client close failed: {0}")]
    Close(String),
}

/// Validation errors
///
/// Raised by configuration and payload validation
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
