//! Replay configuration and batch file loading

use serde::Deserialize;
use std::path::{Path, PathBuf};
use warehouse_series::config::Config;
use warehouse_series::query::BatchQuery;

/// Load configuration
///
/// Priority:
/// 1. `--config` path
/// 2. WAREHOUSE_SERIES_CONFIG environment variable
/// 3. Default configuration
///
/// Environment overrides apply in every case.
pub fn load_config(cli_path: Option<&Path>) -> warehouse_series::Result<Config> {
    let path = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("WAREHOUSE_SERIES_CONFIG").ok().map(PathBuf::from));

    let config = match path {
        Some(path) => Config::from_file_with_env(&path)?,
        None => Config::from_env(),
    };
    config.validate()?;
    Ok(config)
}

/// Batch file layout: `{"queries": [ {...payload...}, ... ]}`
#[derive(Debug, Deserialize)]
struct BatchFile {
    queries: Vec<serde_json::Value>,
}

/// Load a batch file
///
/// Each entry is sent as the raw payload. Its `refId` becomes the query id;
/// entries without one are numbered `Q0`, `Q1`, ...
pub fn load_batch(path: &Path) -> warehouse_series::Result<Vec<BatchQuery>> {
    let contents = std::fs::read_to_string(path)?;
    let batch: BatchFile = serde_json::from_str(&contents).map_err(|e| {
        warehouse_series::Error::Serialization(format!(
            "Failed to parse batch file {}: {}",
            path.display(),
            e
        ))
    })?;

    batch
        .queries
        .into_iter()
        .enumerate()
        .map(|(i, payload)| {
            let query_id = payload
                .get("refId")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Q{}", i));
            Ok(BatchQuery::new(query_id, serde_json::to_vec(&payload)?))
        })
        .collect()
}
