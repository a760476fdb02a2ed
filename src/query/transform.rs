//! Result Transformer
//!
//! Drains a row source into a [`TransformedSeries`]: one sample per row, in
//! emission order. No sorting, aggregation or gap filling. A mid-stream
//! error discards everything built so far.

use crate::metrics;
use crate::query::error::QueryResult;
use crate::query::executor::RowSequence;
use crate::types::{TransformedSeries, WarehouseRow};
use async_trait::async_trait;

/// Pull-based source of decoded rows
///
/// `Ok(None)` is the exhausted signal; an error ends the source.
#[async_trait]
pub trait RowSource: Send {
    /// Next row, `Ok(None)` once exhausted
    async fn next_row(&mut self) -> QueryResult<Option<WarehouseRow>>;
}

#[async_trait]
impl RowSource for RowSequence {
    async fn next_row(&mut self) -> QueryResult<Option<WarehouseRow>> {
        self.next().await
    }
}

/// Consume `rows` to exhaustion
pub async fn transform<S: RowSource>(mut rows: S) -> QueryResult<TransformedSeries> {
    let mut series = TransformedSeries::new();
    while let Some(row) = rows.next_row().await? {
        series.push(row);
    }
    metrics::ROWS_TOTAL.inc_by(series.len() as f64);
    Ok(series)
}
