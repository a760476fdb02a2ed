//! Core data types shared by the executor, transformer and dispatcher
//!
//! # Key Types
//!
//! - **`WarehouseRow`**: one `(time, metric)` row returned by a warehouse job
//! - **`RawRow`**: an undecoded row keyed by column name
//! - **`TransformedSeries`**: parallel `times` / `values` columns for one query
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use warehouse_series::types::{TransformedSeries, WarehouseRow};
//!
//! let mut series = TransformedSeries::new();
//! series.push(WarehouseRow::new(Utc.timestamp_opt(60, 0).unwrap(), 5));
//! series.push(WarehouseRow::new(Utc.timestamp_opt(120, 0).unwrap(), 7));
//! assert_eq!(series.times().len(), series.values().len());
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Timestamp type used for every sample
pub type Timestamp = DateTime<Utc>;

/// Undecoded warehouse row: column name to JSON value
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// One row returned by the warehouse
///
/// Decoded from the `time` and `metric` result columns. Extra columns are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRow {
    /// Sample timestamp
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub time: Timestamp,

    /// Integer metric value
    #[serde(rename = "metric", deserialize_with = "deserialize_int64")]
    pub value: i64,
}

impl WarehouseRow {
    /// Create a row from its parts
    pub fn new(time: Timestamp, value: i64) -> Self {
        Self { time, value }
    }

    /// Decode a raw warehouse row
    pub fn decode(raw: RawRow) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(raw))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Text(String),
    Seconds(f64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match TimestampRepr::deserialize(deserializer)? {
        TimestampRepr::Seconds(secs) => from_epoch_seconds(secs)
            .ok_or_else(|| D::Error::custom(format!("timestamp {} out of range", secs))),
        TimestampRepr::Text(text) => parse_timestamp_text(&text)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", text))),
    }
}

/// Accepts RFC 3339, the warehouse's `YYYY-MM-DD HH:MM:SS[.f] UTC` form, or
/// epoch seconds written as a string
fn parse_timestamp_text(text: &str) -> Option<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }

    let trimmed = text.trim_end_matches(" UTC");
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    text.trim().parse::<f64>().ok().and_then(from_epoch_seconds)
}

fn from_epoch_seconds(secs: f64) -> Option<Timestamp> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Int64Repr {
    Number(i64),
    Text(String),
}

fn deserialize_int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Int64Repr::deserialize(deserializer)? {
        Int64Repr::Number(n) => Ok(n),
        Int64Repr::Text(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|e| D::Error::custom(format!("invalid INT64 '{}': {}", text, e))),
    }
}

/// Columnar time series produced for one query
///
/// `times[i]` and `values[i]` describe the same sample. The fields are only
/// reachable through methods that push both columns together, so the two
/// columns always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformedSeries {
    times: Vec<Timestamp>,
    values: Vec<i64>,
}

impl TransformedSeries {
    /// Create an empty series
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty series with room for `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            times: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Append one row as the next sample
    pub fn push(&mut self, row: WarehouseRow) {
        self.times.push(row.time);
        self.values.push(row.value);
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True when no rows were returned
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time column
    pub fn times(&self) -> &[Timestamp] {
        &self.times
    }

    /// Value column
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Iterate samples in emission order
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, i64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Split into the two columns
    pub fn into_parts(self) -> (Vec<Timestamp>, Vec<i64>) {
        (self.times, self.values)
    }
}

impl FromIterator<WarehouseRow> for TransformedSeries {
    fn from_iter<I: IntoIterator<Item = WarehouseRow>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut series = Self::with_capacity(iter.size_hint().0);
        for row in iter {
            series.push(row);
        }
        series
    }
}
