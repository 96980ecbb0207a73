use reqwest::blocking::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::app::ports::{AccelerationPort, RemoteError, RemoteRequest, RemoteResponse};
use crate::constants::ACCEL_TRANSFORM_PATH;
use crate::error::Result;
use crate::observability::metrics;

/// Blocking client for the remote row transformer.
pub struct ReqwestAcceleration {
    client: Client,
    base_url: String,
}

impl ReqwestAcceleration {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, ACCEL_TRANSFORM_PATH)
    }
}

impl AccelerationPort for ReqwestAcceleration {
    fn transform_rows(&self, request: &RemoteRequest) -> std::result::Result<RemoteResponse, RemoteError> {
        let url = self.endpoint();
        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        metrics::accel::request_duration(started.elapsed().as_secs_f64());

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        let body: Value = resp
            .json()
            .map_err(|e| RemoteError::InvalidShape(format!("body is not JSON: {}", e)))?;
        debug!(url = %url, "remote transform responded");
        RemoteResponse::from_body(&body)
    }
}
