//! Health check for the data source
//!
//! A liveness probe only: it answers `Ok` without contacting the warehouse.
//! Warehouse reachability checks belong to the layer that owns credentials.

use crate::metrics;
use crate::query::context::ExecutionContext;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Message returned by a passing probe
pub const HEALTHY_MESSAGE: &str = "Data source is working";

/// Health status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Data source is working
    Ok,
    /// Data source works with reduced functionality
    Degraded,
    /// Data source is not working
    Error,
}

impl HealthStatus {
    /// Convert to HTTP status code
    pub fn http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Ok => 200,
            HealthStatus::Degraded => 200, // Still serving queries
            HealthStatus::Error => 503,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => f.write_str("ok"),
            HealthStatus::Degraded => f.write_str("degraded"),
            HealthStatus::Error => f.write_str("error"),
        }
    }
}

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckHealthResult {
    /// Overall status
    pub status: HealthStatus,
    /// Human-readable detail
    pub message: String,
}

/// Answers health probes
#[derive(Debug)]
pub struct HealthReporter {
    /// Start time for uptime calculation
    start_time: Instant,
}

impl HealthReporter {
    /// Create a new reporter
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Answer a health probe
    pub async fn check_health(&self, _ctx: &ExecutionContext) -> CheckHealthResult {
        let result = CheckHealthResult {
            status: HealthStatus::Ok,
            message: HEALTHY_MESSAGE.to_string(),
        };

        metrics::HEALTH_CHECKS_TOTAL
            .with_label_values(&[result.status.to_string().as_str()])
            .inc();
        debug!(status = %result.status, uptime_secs = self.uptime().as_secs(), "Health check");
        result
    }

    /// Time since the reporter was created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_ok() {
        let reporter = HealthReporter::new();
        let result = reporter.check_health(&ExecutionContext::background()).await;
        assert_eq!(result.status, HealthStatus::Ok);
        assert_eq!(result.message, HEALTHY_MESSAGE);
    }

    #[test]
    fn test_status_http_codes() {
        assert_eq!(HealthStatus::Ok.http_status_code(), 200);
        assert_eq!(HealthStatus::Degraded.http_status_code(), 200);
        assert_eq!(HealthStatus::Error.http_status_code(), 503);
    }

    #[test]
    fn test_serialization() {
        let result = CheckHealthResult {
            status: HealthStatus::Degraded,
            message: "slow".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "degraded");
    }
}
