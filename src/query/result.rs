//! Query outcomes and response frames
//!
//! Each query in a batch ends as a [`QueryOutcome`]. The dispatcher collects
//! outcomes into a [`QueryDataResponse`] keyed by query id; successful
//! outcomes become a two-column frame (`Time`, `Values`) for the frontend.

use crate::query::error::{QueryError, QueryErrorKind};
use crate::types::{Timestamp, TransformedSeries};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Name of the frame carried by a successful response
pub const FRAME_NAME: &str = "response";

/// Name of the time column
pub const TIME_FIELD: &str = "Time";

/// Name of the value column
pub const VALUES_FIELD: &str = "Values";

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal result of one query
#[derive(Debug)]
pub enum QueryOutcome {
    /// Rows were transformed into a series
    Success(TransformedSeries),
    /// Parsing, execution or transformation failed
    Failure(QueryError),
}

impl QueryOutcome {
    /// True for `Success`
    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success(_))
    }

    /// Series, if successful
    pub fn series(&self) -> Option<&TransformedSeries> {
        match self {
            QueryOutcome::Success(series) => Some(series),
            QueryOutcome::Failure(_) => None,
        }
    }

    /// Error, if failed
    pub fn error(&self) -> Option<&QueryError> {
        match self {
            QueryOutcome::Success(_) => None,
            QueryOutcome::Failure(err) => Some(err),
        }
    }

    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            QueryOutcome::Success(_) => "success",
            QueryOutcome::Failure(err) => match err.kind {
                QueryErrorKind::ParseError => "parse_error",
                QueryErrorKind::ExecutionError(_) => "execution_error",
                QueryErrorKind::Cancelled => "cancelled",
                QueryErrorKind::Timeout => "timeout",
                QueryErrorKind::Internal => "internal",
            },
        }
    }
}

impl From<Result<TransformedSeries, QueryError>> for QueryOutcome {
    fn from(result: Result<TransformedSeries, QueryError>) -> Self {
        match result {
            Ok(series) => QueryOutcome::Success(series),
            Err(err) => QueryOutcome::Failure(err),
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Column values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValues {
    /// Timestamps
    Time(Vec<Timestamp>),
    /// 64-bit integers
    Int64(Vec<i64>),
}

impl FieldValues {
    /// Number of entries
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(v) => v.len(),
            FieldValues::Int64(v) => v.len(),
        }
    }

    /// True when the column is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named column of a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    /// Column name
    pub name: String,
    /// Column values
    pub values: FieldValues,
}

/// Columnar frame handed to the frontend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFrame {
    /// Frame name
    pub name: String,
    /// Columns, all the same length
    pub fields: Vec<Field>,
}

impl DataFrame {
    /// Field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Rows in the frame
    pub fn row_count(&self) -> usize {
        self.fields.first().map(|f| f.values.len()).unwrap_or(0)
    }
}

impl From<TransformedSeries> for DataFrame {
    fn from(series: TransformedSeries) -> Self {
        let (times, values) = series.into_parts();
        Self {
            name: FRAME_NAME.to_string(),
            fields: vec![
                Field {
                    name: TIME_FIELD.to_string(),
                    values: FieldValues::Time(times),
                },
                Field {
                    name: VALUES_FIELD.to_string(),
                    values: FieldValues::Int64(values),
                },
            ],
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Response for one query: frames on success, an error description otherwise
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataResponse {
    /// Result frames; empty on failure
    pub frames: Vec<DataFrame>,

    /// Human-readable error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    /// True when the query failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<QueryOutcome> for DataResponse {
    fn from(outcome: QueryOutcome) -> Self {
        match outcome {
            QueryOutcome::Success(series) => Self {
                frames: vec![DataFrame::from(series)],
                error: None,
            },
            QueryOutcome::Failure(err) => Self {
                frames: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Output format for rendering a batch response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// ASCII table
    Table,
}

impl std::str::FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResultFormat::Json),
            "json-pretty" | "pretty" => Ok(ResultFormat::JsonPretty),
            "table" => Ok(ResultFormat::Table),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Batch response: one entry per distinct query id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDataResponse {
    /// Responses keyed by query id
    pub responses: BTreeMap<String, DataResponse>,
}

impl QueryDataResponse {
    /// Create an empty response
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for `query_id`
    pub fn insert(&mut self, query_id: impl Into<String>, outcome: QueryOutcome) {
        self.responses.insert(query_id.into(), outcome.into());
    }

    /// Response for `query_id`
    pub fn get(&self, query_id: &str) -> Option<&DataResponse> {
        self.responses.get(query_id)
    }

    /// Number of queries answered
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// True for an empty batch
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Number of failed queries
    pub fn error_count(&self) -> usize {
        self.responses.values().filter(|r| r.is_error()).count()
    }

    /// Render the response
    pub fn format(&self, format: ResultFormat) -> String {
        match format {
            ResultFormat::Json => self.to_json(),
            ResultFormat::JsonPretty => self.to_json_pretty(),
            ResultFormat::Table => self.to_table(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to pretty-printed JSON string
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to ASCII table string
    pub fn to_table(&self) -> String {
        let mut output = String::new();

        for (query_id, response) in &self.responses {
            output.push_str(&format!("\nQuery: {}\n", query_id));

            if let Some(error) = &response.error {
                output.push_str(&format!("  error: {}\n", error));
                continue;
            }

            for frame in &response.frames {
                let (Some(FieldValues::Time(times)), Some(FieldValues::Int64(values))) = (
                    frame.field(TIME_FIELD).map(|f| &f.values),
                    frame.field(VALUES_FIELD).map(|f| &f.values),
                ) else {
                    continue;
                };

                output.push_str("+---------------------------+----------------------+\n");
                output.push_str("|           Time            |        Values        |\n");
                output.push_str("+---------------------------+----------------------+\n");

                // Limit to 100 rows for display
                for (time, value) in times.iter().zip(values).take(100) {
                    output.push_str(&format!(
                        "| {:>25} | {:>20} |\n",
                        time.format("%Y-%m-%dT%H:%M:%SZ"),
                        value
                    ));
                }

                output.push_str("+---------------------------+----------------------+\n");

                if times.len() > 100 {
                    output.push_str(&format!("... and {} more rows\n", times.len() - 100));
                }
            }
        }

        output.push_str(&format!(
            "\n{} queries, {} failed\n",
            self.len(),
            self.error_count()
        ));
        output
    }
}

impl fmt::Display for QueryDataResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_table())
    }
}
