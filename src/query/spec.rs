//! Query spec parsing
//!
//! Decodes the per-query JSON payload sent by the frontend into a
//! [`QuerySpec`]. Unknown keys are ignored and every field is optional; only
//! malformed JSON, wrongly typed fields, and unmet conditional requirements
//! are errors.

use crate::metrics;
use crate::query::error::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Format assumed when the payload leaves `format` empty
pub const DEFAULT_FORMAT: &str = "time_series";

/// Result format requested by the frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryFormat {
    /// Time series frames
    TimeSeries,
    /// Tabular frames
    Table,
    /// Any other value, kept verbatim
    Other(String),
}

impl From<String> for QueryFormat {
    fn from(value: String) -> Self {
        match value.as_str() {
            "time_series" => QueryFormat::TimeSeries,
            "table" => QueryFormat::Table,
            _ => QueryFormat::Other(value),
        }
    }
}

impl From<QueryFormat> for String {
    fn from(format: QueryFormat) -> Self {
        format.to_string()
    }
}

impl fmt::Display for QueryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryFormat::TimeSeries => f.write_str("time_series"),
            QueryFormat::Table => f.write_str("table"),
            QueryFormat::Other(other) => f.write_str(other),
        }
    }
}

/// One analytical query request
///
/// Field names on the wire follow the frontend's query editor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuerySpec {
    /// Requested format; `None` when the payload leaves it empty
    #[serde(deserialize_with = "deserialize_format")]
    pub format: Option<QueryFormat>,

    /// Dataset holding `table`
    pub dataset: String,

    /// GROUP BY columns
    pub group: Vec<String>,

    /// Column carrying the metric
    pub metric_column: String,

    /// ORDER BY column
    #[serde(rename = "orderByCol")]
    pub order_by_column: String,

    /// ORDER BY direction, `ASC` or `DESC`
    #[serde(rename = "orderBySort")]
    pub order_by_direction: String,

    /// Whether `table` is partitioned
    pub partitioned: bool,

    /// Partitioning column; required when `partitioned`
    pub partitioned_field: String,

    /// Warehouse project the job runs under
    pub project: String,

    /// Whether the editor is in raw SQL mode
    #[serde(rename = "rawQuery")]
    pub raw_query_mode: bool,

    /// SQL text submitted to the warehouse; required in raw mode
    #[serde(rename = "rawSql")]
    pub raw_sql: String,

    /// Query identifier echoed by the frontend
    #[serde(rename = "refId")]
    pub query_id: String,

    /// Whether `table` is date-sharded
    pub sharded: bool,

    /// Table name
    pub table: String,

    /// Time column name
    pub time_column: String,

    /// Time column type
    pub time_column_type: String,

    /// Execution region; must match the dataset's region
    pub location: String,
}

fn deserialize_format<'de, D>(deserializer: D) -> Result<Option<QueryFormat>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(QueryFormat::from))
}

impl QuerySpec {
    /// Parse a raw payload
    ///
    /// An empty `format` is not an error: it logs a warning, bumps the
    /// defaulted-format counter and leaves `format` as `None`.
    pub fn parse(raw: &[u8]) -> QueryResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| {
            QueryError::parse(format!("invalid query payload: {}", e)).with_source(e)
        })?;

        // Derived struct visitors also accept positional arrays.
        if !value.is_object() {
            return Err(QueryError::parse("query payload must be a JSON object"));
        }

        let spec: QuerySpec = serde_json::from_value(value).map_err(|e| {
            QueryError::parse(format!("invalid query payload: {}", e)).with_source(e)
        })?;

        spec.validate()?;

        if spec.format.is_none() {
            metrics::FORMAT_DEFAULTED_TOTAL.inc();
            warn!(
                query_id = %spec.query_id,
                default = DEFAULT_FORMAT,
                "format is empty, defaulting to time series"
            );
        }

        Ok(spec)
    }

    /// Check conditional field requirements
    pub fn validate(&self) -> QueryResult<()> {
        if self.raw_query_mode && self.raw_sql.trim().is_empty() {
            return Err(QueryError::parse("rawSql is required when rawQuery is set"));
        }
        if self.partitioned && self.partitioned_field.trim().is_empty() {
            return Err(QueryError::parse(
                "partitionedField is required when partitioned is set",
            ));
        }
        Ok(())
    }

    /// Requested format, falling back to time series
    pub fn effective_format(&self) -> QueryFormat {
        self.format.clone().unwrap_or(QueryFormat::TimeSeries)
    }
}
