use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::app::ports::{JobReporterPort, StepContext};
use crate::error::{CleanflowError, Result};
use crate::pipeline::artifacts::ArtifactRecord;

/// Reports step lifecycle and artifacts to the job bookkeeping service.
pub struct HttpJobReporter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpJobReporter {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn step_url(&self, step: &StepContext, action: &str) -> String {
        format!(
            "{}/api/v1/jobs/{}/steps/{}/{}",
            self.base_url, step.job_id, step.step_id, action
        )
    }

    /// Candidate endpoints for artifact registration, tried in order.
    pub fn artifact_urls(&self, job_id: &str) -> [String; 3] {
        let jobs = format!("{}/api/v1/jobs/{}", self.base_url, job_id);
        [
            format!("{}/artifacts/upsert", jobs),
            format!("{}/artifacts", jobs),
            format!("{}/artifacts/register", jobs),
        ]
    }

    fn post<B: Serialize + ?Sized>(&self, url: &str, actor: &str, body: &B) -> Result<()> {
        let mut req = self.client.post(url).query(&[("actor", actor)]).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }
        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(CleanflowError::Reporter(format!("POST {} -> {} {}", url, status.as_u16(), text)));
        }
        debug!(url = %url, "job reporter call ok");
        Ok(())
    }
}

impl JobReporterPort for HttpJobReporter {
    fn step_start(&self, step: &StepContext, params: &Value) -> Result<()> {
        let body = json!({
            "ruleset_version": step.ruleset_version,
            "input_uri": step.input_uri,
            "output_uri": step.output_uri,
            "params": params,
        });
        self.post(&self.step_url(step, "start"), &step.actor, &body)
    }

    fn artifact_upsert(&self, step: &StepContext, artifact: &ArtifactRecord) -> Result<()> {
        let body = json!({
            "artifact_id": artifact.artifact_id,
            "kind": artifact.kind,
            "path": artifact.path,
            "sha256": artifact.sha256,
            "extra_json": Value::Null,
        });
        let urls = self.artifact_urls(&step.job_id);
        let mut last_err = String::new();
        for url in &urls {
            match self.post(url, &step.actor, &body) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(url = %url, error = %e, "artifact upsert endpoint rejected");
                    last_err = e.to_string();
                }
            }
        }
        Err(CleanflowError::Reporter(format!(
            "artifact upsert failed, tried {:?}, last_err={}",
            urls, last_err
        )))
    }

    fn step_done(&self, step: &StepContext, output_hash: &str) -> Result<()> {
        let body = json!({ "output_hash": output_hash });
        self.post(&self.step_url(step, "done"), &step.actor, &body)
    }

    fn step_fail(&self, step: &StepContext, error: &str) -> Result<()> {
        let body = json!({ "error": error });
        self.post(&self.step_url(step, "fail"), &step.actor, &body)
    }
}
