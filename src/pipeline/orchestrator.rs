//! Cleaning flow for one job step.
//!
//! ```text
//! START -> REMOTE_ATTEMPT | LOCAL_ONLY -> VALIDATE -> MATERIALIZE -> DONE
//!                                                                  \-> FAILED
//! ```
//!
//! Local cleaning always runs first so that a failed or invalid remote
//! result can fall back to rows that are already in hand. Quality gates and
//! strict parquet checks run on whichever result is materialized, and
//! artifacts are only registered once every file has been written and
//! checked.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::app::ports::{
    AccelerationPort, ArtifactSink, JobReporterPort, NoopReporter, RemoteArtifact, RemoteRequest, StepContext,
};
use crate::coerce::{to_bool, to_float, value_text};
use crate::config::FlowConfig;
use crate::constants::{ARTIFACT_CSV_ID, ARTIFACT_PARQUET_ID, ARTIFACT_PROFILE_ID, CLEANING_STEP_ID};
use crate::error::{CleanflowError, Result};
use crate::infra::{HttpJobReporter, ReqwestAcceleration};
use crate::observability::metrics;
use crate::pipeline::artifacts::{
    is_valid_parquet_file, materialize_parquet, sha256_file, write_cleaned_csv, write_profile_json, ArtifactRecord,
    ParquetFileSink,
};
use crate::pipeline::ingestion::{load_raw_rows, maybe_preprocess_input};
use crate::pipeline::processing::cleaning::{clean_rows, LocalEngine};
use crate::pipeline::processing::quality_gate::{GateEvaluation, QualityGate, QualityGateConfig, ThresholdQualityGate};
use crate::pipeline::profile::Profile;
use crate::rules::{rule_param, rules_object, RuleMode};
use crate::types::{QualityStats, Row};

/// Where the cleaned rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Local(LocalEngine),
    Remote,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Local(LocalEngine::Simple) => "local_simple",
            ExecutionPath::Local(LocalEngine::Generic) => "local_generic",
            ExecutionPath::Remote => "remote",
        }
    }
}

/// Picks the path before anything runs. The remote engine only understands
/// simple rules, so generic mode and a forced-local flag both stay local.
pub fn decide_execution_path(mode: RuleMode, force_local: bool, accel_enabled: bool) -> ExecutionPath {
    match mode {
        RuleMode::Generic => ExecutionPath::Local(LocalEngine::Generic),
        RuleMode::Simple if force_local || !accel_enabled => ExecutionPath::Local(LocalEngine::Simple),
        RuleMode::Simple => ExecutionPath::Remote,
    }
}

/// [`decide_execution_path`] driven by job params and config.
pub fn execution_path_for(params: &Value, config: &FlowConfig) -> ExecutionPath {
    let force_local = rule_param(params, "force_local_cleaning")
        .map(|v| to_bool(v, false))
        .unwrap_or(false);
    decide_execution_path(RuleMode::detect(params), force_local, config.accel.enabled)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Start,
    RemoteAttempt,
    LocalOnly,
    Validate,
    Materialize,
    Done,
    Failed,
}

/// What happened on the remote path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccelInfo {
    pub attempted: bool,
    pub ok: bool,
    pub used_fallback: bool,
    pub validation_error: Option<String>,
    pub error: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningResult {
    pub ok: bool,
    pub job_id: String,
    pub flow: String,
    pub execution_path: ExecutionPath,
    pub states: Vec<FlowState>,
    pub output_hash: String,
    pub seconds: f64,
    pub finished_at: String,
    pub artifacts: Vec<ArtifactRecord>,
    pub profile: Profile,
    pub accel: AccelInfo,
}

/// One cleaning invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRequest {
    pub job_id: String,
    pub actor: String,
    pub ruleset_version: String,
    pub params: Value,
}

/// Directories for one job under the bus root.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLayout {
    pub job_root: PathBuf,
    pub stage_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub evidence_dir: PathBuf,
    pub input_uri: String,
    pub output_uri: String,
}

impl JobLayout {
    pub fn for_job(job_id: &str, params: &Value, config: &FlowConfig) -> Self {
        let job_root = params
            .get("job_root")
            .map(value_text)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| config.bus_root.join("jobs").join(job_id));
        let default_uri = format!("{}/", job_root.display());
        let uri = |key: &str| {
            params
                .get(key)
                .map(value_text)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| default_uri.clone())
        };
        Self {
            stage_dir: job_root.join("stage"),
            artifacts_dir: job_root.join("artifacts"),
            evidence_dir: job_root.join("evidence"),
            input_uri: uri("input_uri"),
            output_uri: uri("output_uri"),
            job_root,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.stage_dir, &self.artifacts_dir, &self.evidence_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Collaborators the flow talks to.
pub struct FlowPorts {
    pub accel: Box<dyn AccelerationPort>,
    pub reporter: Box<dyn JobReporterPort>,
    pub sink: Box<dyn ArtifactSink>,
}

impl FlowPorts {
    /// HTTP adapters from `config`, with `accel_url` and
    /// `accel_timeout_seconds` overridable per job.
    pub fn for_job(config: &FlowConfig, params: &Value) -> Result<Self> {
        let accel_url = params
            .get("accel_url")
            .map(value_text)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| config.accel.url.clone());
        let accel_timeout = params
            .get("accel_timeout_seconds")
            .and_then(to_float)
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| config.accel_timeout());

        let reporter: Box<dyn JobReporterPort> = match &config.base.url {
            Some(url) => {
                let api_key = params
                    .get("api_key")
                    .map(value_text)
                    .or_else(|| config.base.api_key.clone());
                Box::new(HttpJobReporter::new(url, api_key, config.base_timeout())?)
            }
            None => Box::new(NoopReporter),
        };

        Ok(Self {
            accel: Box::new(ReqwestAcceleration::new(&accel_url, accel_timeout)?),
            reporter,
            sink: Box::new(ParquetFileSink),
        })
    }
}

fn strict_parquet(params: &Value, config: &FlowConfig) -> bool {
    rule_param(params, "local_parquet_strict")
        .map(|v| to_bool(v, true))
        .unwrap_or(config.local_parquet_strict)
}

fn allow_empty_output(params: &Value) -> bool {
    rule_param(params, "allow_empty_output")
        .map(|v| to_bool(v, true))
        .unwrap_or(true)
}

fn remote_request(job_id: &str, rows: &[Row], params: &Value) -> RemoteRequest {
    let gate = |key: &str| rule_param(params, key).cloned().unwrap_or(Value::Null);
    RemoteRequest {
        run_id: job_id.to_string(),
        rows: rows.to_vec(),
        rules: rules_object(params),
        quality_gates: json!({
            "max_invalid_rows": gate("max_invalid_rows"),
            "max_filtered_rows": gate("max_filtered_rows"),
            "min_output_rows": gate("min_output_rows"),
            "max_invalid_ratio": gate("max_invalid_ratio"),
            "required_fields": gate("required_fields"),
            "max_required_missing_ratio": gate("max_required_missing_ratio"),
        }),
        schema_hint: json!({"source": "cleanflow.cleaning"}),
    }
}

/// The row set chosen for materialization.
struct Chosen {
    path: ExecutionPath,
    rows: Vec<Row>,
    quality: QualityStats,
    source: String,
    remote_parquet: Option<RemoteArtifact>,
}

/// Calls the remote engine and decides whether its result is usable.
fn attempt_remote(ports: &FlowPorts, request: &RemoteRequest, accel: &mut AccelInfo) -> Option<Chosen> {
    accel.attempted = true;
    metrics::accel::attempt();
    let resp = match ports.accel.transform_rows(request) {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "remote acceleration failed, falling back to local rows");
            metrics::accel::fallback(e.kind());
            accel.error = Some(e.to_string());
            return None;
        }
    };
    accel.ok = true;
    accel.trace_id = Some(resp.trace_id.clone()).filter(|t| !t.is_empty());

    if resp.rows.len() as u64 != resp.quality.output_rows {
        let msg = format!(
            "remote row count mismatch: rows={} quality.output_rows={}",
            resp.rows.len(),
            resp.quality.output_rows
        );
        warn!(validation_error = %msg, "remote result rejected, falling back to local rows");
        metrics::accel::fallback("row_count_mismatch");
        accel.validation_error = Some(msg);
        return None;
    }

    if let Some(artifact) = &resp.outputs.cleaned_parquet {
        if !is_valid_parquet_file(Path::new(&artifact.path)) {
            let shown = if artifact.path.is_empty() { "<empty path>" } else { artifact.path.as_str() };
            let msg = format!("invalid parquet from accel output: {}", shown);
            warn!(validation_error = %msg, "remote artifact rejected, falling back to local rows");
            metrics::accel::fallback("invalid_parquet");
            accel.validation_error = Some(msg);
            return None;
        }
    }

    metrics::accel::success();
    Some(Chosen {
        path: ExecutionPath::Remote,
        rows: resp.rows,
        quality: resp.quality,
        source: "accel".to_string(),
        remote_parquet: resp.outputs.cleaned_parquet,
    })
}

fn evaluate_gates(quality: &QualityStats, params: &Value) -> Result<GateEvaluation> {
    let gate = ThresholdQualityGate::with_config(QualityGateConfig::from_params(params));
    match gate.evaluate(quality) {
        Ok(evaluation) => {
            metrics::quality_gate::passed();
            Ok(evaluation)
        }
        Err(failure) => {
            metrics::quality_gate::failed(failure.gate.as_str());
            warn!(
                gate = failure.gate.as_str(),
                threshold = %failure.threshold,
                observed = %failure.observed,
                "quality gate failed"
            );
            Err(failure.into())
        }
    }
}

fn run_steps(
    request: &FlowRequest,
    config: &FlowConfig,
    ports: &FlowPorts,
    layout: &JobLayout,
    states: &mut Vec<FlowState>,
    started: Instant,
) -> Result<CleaningResult> {
    let (params, preprocess) = maybe_preprocess_input(&request.params, &layout.job_root, &layout.stage_dir)?;
    let raw = load_raw_rows(&params, Some(&layout.job_root))?;
    let (engine, local) = clean_rows(&raw.rows, &params);
    metrics::cleaning::outcome(engine.as_str(), &local.quality);
    info!(
        engine = engine.as_str(),
        source = %raw.source,
        input_rows = local.quality.input_rows,
        output_rows = local.quality.output_rows,
        "local cleaning complete"
    );

    let planned = execution_path_for(&params, config);
    let mut accel = AccelInfo::default();
    let remote = match planned {
        ExecutionPath::Remote => {
            states.push(FlowState::RemoteAttempt);
            attempt_remote(ports, &remote_request(&request.job_id, &raw.rows, &params), &mut accel)
        }
        ExecutionPath::Local(_) => {
            states.push(FlowState::LocalOnly);
            None
        }
    };
    accel.used_fallback = accel.attempted && remote.is_none();

    states.push(FlowState::Validate);
    let chosen = remote.unwrap_or(Chosen {
        path: ExecutionPath::Local(engine),
        rows: local.rows,
        quality: local.quality,
        source: raw.source,
        remote_parquet: None,
    });
    let gate_evaluation = evaluate_gates(&chosen.quality, &params)?;
    if chosen.rows.is_empty() && !allow_empty_output(&params) {
        return Err(CleanflowError::EmptyOutput);
    }

    states.push(FlowState::Materialize);
    let cleaned_csv = layout.stage_dir.join("cleaned.csv");
    write_cleaned_csv(&cleaned_csv, &chosen.rows)?;

    let (cleaned_parquet, sha_parquet) = match &chosen.remote_parquet {
        Some(artifact) => {
            let path = PathBuf::from(&artifact.path);
            let sha = sha256_file(&path)?;
            if let Some(reported) = artifact.sha256.as_deref().filter(|s| !s.is_empty()) {
                if !reported.eq_ignore_ascii_case(&sha) {
                    warn!(path = %path.display(), reported, computed = %sha, "remote parquet hash differs, using computed");
                }
            }
            (path, sha)
        }
        None => {
            let path = layout.stage_dir.join("cleaned.parquet");
            let parquet_engine = match chosen.path {
                ExecutionPath::Local(e) => e,
                ExecutionPath::Remote => LocalEngine::Simple,
            };
            let valid = materialize_parquet(ports.sink.as_ref(), &path, &chosen.rows, parquet_engine)?;
            if !valid {
                if strict_parquet(&params, config) {
                    error!(path = %path.display(), "local parquet invalid under strict mode");
                    return Err(CleanflowError::StrictParquet {
                        path: path.display().to_string(),
                    });
                }
                warn!(path = %path.display(), "local parquet invalid, strict mode off, keeping placeholder");
            }
            let sha = sha256_file(&path)?;
            (path, sha)
        }
    };

    let profile = Profile::build(&chosen.rows, &chosen.quality, &chosen.source)
        .with_quality_gate(gate_evaluation)
        .with_preprocess(preprocess);
    let profile_json = layout.evidence_dir.join("profile.json");
    write_profile_json(&profile_json, &profile, &params)?;

    let artifacts = vec![
        ArtifactRecord::new(ARTIFACT_CSV_ID, "csv", &cleaned_csv, sha256_file(&cleaned_csv)?),
        ArtifactRecord::new(ARTIFACT_PARQUET_ID, "parquet", &cleaned_parquet, sha_parquet.clone()),
        ArtifactRecord::new(ARTIFACT_PROFILE_ID, "json", &profile_json, sha256_file(&profile_json)?),
    ];
    metrics::flow::artifacts_written(artifacts.len() as u64);
    states.push(FlowState::Done);

    Ok(CleaningResult {
        ok: true,
        job_id: request.job_id.clone(),
        flow: "cleaning".to_string(),
        execution_path: chosen.path,
        states: states.clone(),
        output_hash: sha_parquet,
        seconds: (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0,
        finished_at: Utc::now().to_rfc3339(),
        artifacts,
        profile,
        accel,
    })
}

/// Runs the cleaning step for one job.
///
/// Reporter calls are best-effort: their failures are logged and never
/// change the outcome. Any error inside the flow marks the step failed
/// before it is returned.
#[instrument(skip_all, fields(job_id = %request.job_id, actor = %request.actor))]
pub fn run_cleaning_flow(request: &FlowRequest, config: &FlowConfig, ports: &FlowPorts) -> Result<CleaningResult> {
    let started = Instant::now();
    let layout = JobLayout::for_job(&request.job_id, &request.params, config);
    let step = StepContext {
        job_id: request.job_id.clone(),
        step_id: CLEANING_STEP_ID.to_string(),
        actor: request.actor.clone(),
        ruleset_version: request.ruleset_version.clone(),
        input_uri: layout.input_uri.clone(),
        output_uri: layout.output_uri.clone(),
    };

    let mut states = vec![FlowState::Start];
    let outcome = layout.ensure_dirs().and_then(|()| {
        if let Err(e) = ports.reporter.step_start(&step, &request.params) {
            warn!(error = %e, "step start not recorded");
        }
        run_steps(request, config, ports, &layout, &mut states, started)
    });

    match outcome {
        Ok(result) => {
            for artifact in &result.artifacts {
                if let Err(e) = ports.reporter.artifact_upsert(&step, artifact) {
                    warn!(artifact_id = %artifact.artifact_id, error = %e, "artifact registration failed");
                }
            }
            if let Err(e) = ports.reporter.step_done(&step, &result.output_hash) {
                warn!(error = %e, "step done not recorded");
            }
            metrics::flow::success(result.execution_path.as_str());
            metrics::flow::duration(result.seconds);
            info!(
                execution_path = result.execution_path.as_str(),
                used_fallback = result.accel.used_fallback,
                rows = result.profile.rows,
                seconds = result.seconds,
                "cleaning flow complete"
            );
            Ok(result)
        }
        Err(e) => {
            states.push(FlowState::Failed);
            metrics::flow::error();
            error!(error = %e, states = ?states, "cleaning flow failed");
            if let Err(report_err) = ports.reporter.step_fail(&step, &e.to_string()) {
                warn!(error = %report_err, "step failure not recorded");
            }
            Err(e)
        }
    }
}
