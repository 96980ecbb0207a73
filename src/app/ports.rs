use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

use crate::error::Result;
use crate::pipeline::artifacts::ArtifactRecord;
use crate::pipeline::processing::cleaning::LocalEngine;
use crate::types::{QualityStats, Row};

// Remote acceleration

/// Body sent to the remote row transformer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRequest {
    pub run_id: String,
    pub rows: Vec<Row>,
    pub rules: Map<String, Value>,
    pub quality_gates: Value,
    pub schema_hint: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteArtifact {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteOutputs {
    #[serde(default)]
    pub cleaned_parquet: Option<RemoteArtifact>,
}

/// A remote result that passed shape validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteResponse {
    pub rows: Vec<Row>,
    pub quality: QualityStats,
    pub trace_id: String,
    pub outputs: RemoteOutputs,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("remote transport failed: {0}")]
    Transport(String),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote response invalid: {0}")]
    InvalidShape(String),
}

impl RemoteError {
    /// Short label used for metrics and the flow result.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Transport(_) => "transport",
            RemoteError::Status { .. } => "status",
            RemoteError::InvalidShape(_) => "invalid_shape",
        }
    }
}

impl RemoteResponse {
    /// Accepts a decoded body only when `rows` is a list of objects and
    /// `quality` is a mapping of non-negative counters.
    pub fn from_body(body: &Value) -> std::result::Result<Self, RemoteError> {
        let rows = body
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| RemoteError::InvalidShape("rows must be a list".to_string()))?;
        let quality = body
            .get("quality")
            .filter(|q| q.is_object())
            .ok_or_else(|| RemoteError::InvalidShape("quality must be an object".to_string()))?;

        let rows = rows
            .iter()
            .map(|r| r.as_object().cloned())
            .collect::<Option<Vec<Row>>>()
            .ok_or_else(|| RemoteError::InvalidShape("rows must contain only objects".to_string()))?;
        let quality: QualityStats = serde_json::from_value(quality.clone())
            .map_err(|e| RemoteError::InvalidShape(format!("quality: {}", e)))?;
        let outputs = body
            .get("outputs")
            .filter(|o| o.is_object())
            .map(|o| serde_json::from_value::<RemoteOutputs>(o.clone()))
            .transpose()
            .map_err(|e| RemoteError::InvalidShape(format!("outputs: {}", e)))?
            .unwrap_or_default();
        let trace_id = body
            .get("trace_id")
            .map(crate::coerce::value_text)
            .unwrap_or_default();

        Ok(Self {
            rows,
            quality,
            trace_id,
            outputs,
        })
    }
}

pub trait AccelerationPort: Send + Sync {
    fn transform_rows(&self, request: &RemoteRequest) -> std::result::Result<RemoteResponse, RemoteError>;
}

// Job bookkeeping

/// Identifies one step of one job for the bookkeeping service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepContext {
    pub job_id: String,
    pub step_id: String,
    pub actor: String,
    pub ruleset_version: String,
    pub input_uri: String,
    pub output_uri: String,
}

pub trait JobReporterPort: Send + Sync {
    fn step_start(&self, step: &StepContext, params: &Value) -> Result<()>;
    fn artifact_upsert(&self, step: &StepContext, artifact: &ArtifactRecord) -> Result<()>;
    fn step_done(&self, step: &StepContext, output_hash: &str) -> Result<()>;
    fn step_fail(&self, step: &StepContext, error: &str) -> Result<()>;
}

/// Reporter used when no bookkeeping service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl JobReporterPort for NoopReporter {
    fn step_start(&self, _step: &StepContext, _params: &Value) -> Result<()> {
        Ok(())
    }

    fn artifact_upsert(&self, _step: &StepContext, _artifact: &ArtifactRecord) -> Result<()> {
        Ok(())
    }

    fn step_done(&self, _step: &StepContext, _output_hash: &str) -> Result<()> {
        Ok(())
    }

    fn step_fail(&self, _step: &StepContext, _error: &str) -> Result<()> {
        Ok(())
    }
}

// Artifact output

/// Writes the columnar cleaned-rows artifact.
pub trait ArtifactSink: Send + Sync {
    fn write_parquet(&self, path: &Path, rows: &[Row], engine: LocalEngine) -> Result<()>;
}
