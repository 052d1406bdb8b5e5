//! HTTP probes against the model server's loopback endpoint.

use crate::error::{GovernorError, Result};
use crate::process::types::{HealthReport, ServerMetrics};
use serde_json::Value;
use std::time::Duration;

/// Client for the server's `/health` and `/metrics` endpoints.
#[derive(Debug, Clone)]
pub struct ServerProbe {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ServerProbe {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe `/health`; any non-2xx answer is an error.
    pub async fn health(&self) -> Result<HealthReport> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    GovernorError::HealthCheckFailed(format!("{} unreachable", self.base_url))
                } else {
                    GovernorError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(GovernorError::HealthCheckFailed(format!(
                "status {}",
                response.status().as_u16()
            )));
        }

        // An empty or non-JSON body still counts as healthy
        let body = response.bytes().await?;
        let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        Ok(HealthReport::from_json(&value))
    }

    /// Fetch `/metrics` and parse it defensively.
    pub async fn metrics(&self) -> Result<ServerMetrics> {
        let url = format!("{}/metrics", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GovernorError::MetricsUnavailable(format!(
                "status {}",
                response.status().as_u16()
            )));
        }

        let body = response.bytes().await?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| GovernorError::DeserializationError(e.to_string()))?;
        Ok(ServerMetrics::from_json(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_base_url() {
        let probe = ServerProbe::new("http://127.0.0.1:8001", Duration::from_secs(5));
        assert_eq!(probe.base_url(), "http://127.0.0.1:8001");
    }

    #[tokio::test]
    async fn test_probe_unreachable_server() {
        // Port 9 (discard) is almost never served on loopback
        let probe = ServerProbe::new("http://127.0.0.1:9", Duration::from_millis(500));

        assert!(matches!(
            probe.health().await,
            Err(GovernorError::HealthCheckFailed(_)) | Err(GovernorError::Http(_))
        ));
        assert!(probe.metrics().await.is_err());
    }
}
