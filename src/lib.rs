//! Warehouse Series - batch time-series queries over a columnar warehouse
//!
//! This library answers batches of analytical queries with:
//! - One concurrent task per query, with per-query failure isolation
//! - Cooperative cancellation through a shared execution context
//! - Lazy, single-pass row cursors with guaranteed client release
//! - Columnar `Time` / `Values` frames for visualization frontends

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Liveness probe
pub mod health;

/// Warehouse collaborator traits and the in-memory backend
pub mod warehouse;

/// Parse, execute, transform and dispatch of query batches
pub mod query;

// Re-export main types
pub use error::{Error, Result, WarehouseError};
pub use health::{CheckHealthResult, HealthReporter, HealthStatus};
pub use query::{
    BatchQuery, ExecutionContext, QueryDataResponse, QueryDispatcher, QueryExecutor, QuerySpec,
};
pub use types::{TransformedSeries, WarehouseRow};
