//! Batch query engine
//!
//! Turns a batch of frontend query payloads into time-series frames:
//!
//! ```text
//! (query id, payload) × N
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Dispatch   │  one task per query, shared execution context
//! └─────────────┘
//!      │ per task
//!      ▼
//! ┌─────────────┐
//! │   Parse     │  JSON payload → QuerySpec
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  warehouse job → lazy RowSequence
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │ Transform   │  rows → TransformedSeries (Time, Values)
//! └─────────────┘
//!      │
//!      ▼
//! query id → Success(frame) | Failure(error)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warehouse_series::query::{BatchQuery, ExecutionContext, QueryDispatcher, QueryExecutor};
//! use warehouse_series::warehouse::MemoryWarehouse;
//!
//! # async fn example() {
//! let executor = QueryExecutor::new(Arc::new(MemoryWarehouse::new()));
//! let dispatcher = QueryDispatcher::new(executor);
//! let (_cancel, ctx) = ExecutionContext::new();
//!
//! let response = dispatcher
//!     .dispatch(&ctx, vec![BatchQuery::new("A", br#"{"rawSql": "SELECT 1"}"#.to_vec())])
//!     .await;
//! println!("{}", response.to_json_pretty());
//! # }
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod result;
pub mod spec;
pub mod transform;

// Re-export main types
pub use context::{CancelHandle, ExecutionContext, StopReason};
pub use dispatcher::{BatchQuery, DispatcherConfig, QueryDispatcher, QueryState};
pub use error::{ExecutionCause, QueryError, QueryErrorKind};
pub use executor::{ExecutorConfig, QueryExecutor, RowSequence};
pub use result::{DataFrame, DataResponse, QueryDataResponse, QueryOutcome, ResultFormat};
pub use spec::{QueryFormat, QuerySpec};
pub use transform::{transform, RowSource};
