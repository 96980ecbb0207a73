//! Metrics for the cleaning flow.
//!
//! Every metric name lives in [`MetricName`] so call sites never spell a raw
//! string. Recording goes through the `metrics` facade; until [`init`] installs
//! the Prometheus recorder every call is a no-op.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::{CleanflowError, Result};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Cleaning metrics
    CleaningRowsIn,
    CleaningRowsOut,
    CleaningInvalidRows,
    CleaningFilteredRows,
    CleaningDuplicatesRemoved,

    // Acceleration metrics
    AccelAttempts,
    AccelSuccess,
    AccelFallbacks,
    AccelRequestDuration,

    // Quality gate metrics
    QualityGatePassed,
    QualityGateFailed,

    // Preprocess metrics
    PreprocessRowsIn,
    PreprocessRowsOut,
    PreprocessStagesCompleted,

    // Flow metrics
    FlowRunsSuccess,
    FlowRunsError,
    FlowDuration,
    FlowArtifactsWritten,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CleaningRowsIn => "cleanflow_cleaning_rows_in_total",
            MetricName::CleaningRowsOut => "cleanflow_cleaning_rows_out_total",
            MetricName::CleaningInvalidRows => "cleanflow_cleaning_invalid_rows_total",
            MetricName::CleaningFilteredRows => "cleanflow_cleaning_filtered_rows_total",
            MetricName::CleaningDuplicatesRemoved => "cleanflow_cleaning_duplicates_removed_total",

            MetricName::AccelAttempts => "cleanflow_accel_attempts_total",
            MetricName::AccelSuccess => "cleanflow_accel_success_total",
            MetricName::AccelFallbacks => "cleanflow_accel_fallbacks_total",
            MetricName::AccelRequestDuration => "cleanflow_accel_request_duration_seconds",

            MetricName::QualityGatePassed => "cleanflow_quality_gate_passed_total",
            MetricName::QualityGateFailed => "cleanflow_quality_gate_failed_total",

            MetricName::PreprocessRowsIn => "cleanflow_preprocess_rows_in_total",
            MetricName::PreprocessRowsOut => "cleanflow_preprocess_rows_out_total",
            MetricName::PreprocessStagesCompleted => "cleanflow_preprocess_stages_completed_total",

            MetricName::FlowRunsSuccess => "cleanflow_flow_runs_success_total",
            MetricName::FlowRunsError => "cleanflow_flow_runs_error_total",
            MetricName::FlowDuration => "cleanflow_flow_duration_seconds",
            MetricName::FlowArtifactsWritten => "cleanflow_flow_artifacts_written_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            CleaningRowsIn,
            CleaningRowsOut,
            CleaningInvalidRows,
            CleaningFilteredRows,
            CleaningDuplicatesRemoved,
            AccelAttempts,
            AccelSuccess,
            AccelFallbacks,
            AccelRequestDuration,
            QualityGatePassed,
            QualityGateFailed,
            PreprocessRowsIn,
            PreprocessRowsOut,
            PreprocessStagesCompleted,
            FlowRunsSuccess,
            FlowRunsError,
            FlowDuration,
            FlowArtifactsWritten,
        ]
        .into_iter()
    }

    /// Returns (phase, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::CleaningRowsIn => ("cleaning", "Rows handed to a rule engine"),
            MetricName::CleaningRowsOut => ("cleaning", "Rows surviving cleaning"),
            MetricName::CleaningInvalidRows => ("cleaning", "Rows dropped as invalid"),
            MetricName::CleaningFilteredRows => ("cleaning", "Rows dropped by filters"),
            MetricName::CleaningDuplicatesRemoved => ("cleaning", "Rows dropped as duplicates"),

            MetricName::AccelAttempts => ("accel", "Remote acceleration calls attempted"),
            MetricName::AccelSuccess => ("accel", "Remote results adopted"),
            MetricName::AccelFallbacks => ("accel", "Remote attempts that fell back to local output"),
            MetricName::AccelRequestDuration => ("accel", "Remote call duration in seconds"),

            MetricName::QualityGatePassed => ("quality_gate", "Gate evaluations that passed"),
            MetricName::QualityGateFailed => ("quality_gate", "Gate evaluations that failed, by gate"),

            MetricName::PreprocessRowsIn => ("preprocess", "Rows read by preprocessing"),
            MetricName::PreprocessRowsOut => ("preprocess", "Rows written by preprocessing"),
            MetricName::PreprocessStagesCompleted => ("preprocess", "Pipeline stages completed, by stage"),

            MetricName::FlowRunsSuccess => ("flow", "Cleaning flows completed"),
            MetricName::FlowRunsError => ("flow", "Cleaning flows failed"),
            MetricName::FlowDuration => ("flow", "Cleaning flow duration in seconds"),
            MetricName::FlowArtifactsWritten => ("flow", "Artifacts materialized"),
        }
    }
}

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Calling it again is a no-op.
pub fn init() -> Result<()> {
    if PROMETHEUS.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CleanflowError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;
    let _ = PROMETHEUS.set(handle);
    info!("Metrics system initialized");
    Ok(())
}

/// Prometheus text snapshot, if the recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS.get().map(|h| h.render())
}

// ============================================================================
// Cleaning Metrics
// ============================================================================

pub mod cleaning {
    use super::MetricName;
    use crate::types::QualityStats;

    /// Records one engine run, labelled by engine.
    pub fn outcome(engine: &'static str, quality: &QualityStats) {
        ::metrics::counter!(MetricName::CleaningRowsIn.as_str(), "engine" => engine).increment(quality.input_rows);
        ::metrics::counter!(MetricName::CleaningRowsOut.as_str(), "engine" => engine).increment(quality.output_rows);
        ::metrics::counter!(MetricName::CleaningInvalidRows.as_str(), "engine" => engine)
            .increment(quality.invalid_rows);
        ::metrics::counter!(MetricName::CleaningFilteredRows.as_str(), "engine" => engine)
            .increment(quality.filtered_rows);
        ::metrics::counter!(MetricName::CleaningDuplicatesRemoved.as_str(), "engine" => engine)
            .increment(quality.duplicate_rows_removed);
    }
}

// ============================================================================
// Acceleration Metrics
// ============================================================================

pub mod accel {
    use super::MetricName;

    pub fn attempt() {
        ::metrics::counter!(MetricName::AccelAttempts.as_str()).increment(1);
    }

    pub fn success() {
        ::metrics::counter!(MetricName::AccelSuccess.as_str()).increment(1);
    }

    /// Record a fallback to local output, labelled by cause.
    pub fn fallback(reason: &'static str) {
        ::metrics::counter!(MetricName::AccelFallbacks.as_str(), "reason" => reason).increment(1);
    }

    pub fn request_duration(secs: f64) {
        ::metrics::histogram!(MetricName::AccelRequestDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Quality Gate Metrics
// ============================================================================

pub mod quality_gate {
    use super::MetricName;

    pub fn passed() {
        ::metrics::counter!(MetricName::QualityGatePassed.as_str()).increment(1);
    }

    pub fn failed(gate: &'static str) {
        ::metrics::counter!(MetricName::QualityGateFailed.as_str(), "gate" => gate).increment(1);
    }
}

// ============================================================================
// Preprocess Metrics
// ============================================================================

pub mod preprocess {
    use super::MetricName;

    pub fn rows_in(count: u64) {
        ::metrics::counter!(MetricName::PreprocessRowsIn.as_str()).increment(count);
    }

    pub fn rows_out(count: u64) {
        ::metrics::counter!(MetricName::PreprocessRowsOut.as_str()).increment(count);
    }

    pub fn stage_completed(stage: &'static str) {
        ::metrics::counter!(MetricName::PreprocessStagesCompleted.as_str(), "stage" => stage).increment(1);
    }
}

// ============================================================================
// Flow Metrics
// ============================================================================

pub mod flow {
    use super::MetricName;

    pub fn success(path: &'static str) {
        ::metrics::counter!(MetricName::FlowRunsSuccess.as_str(), "path" => path).increment(1);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::FlowRunsError.as_str()).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::FlowDuration.as_str()).record(secs);
    }

    pub fn artifacts_written(count: u64) {
        ::metrics::counter!(MetricName::FlowArtifactsWritten.as_str()).increment(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
        assert!(names.iter().all(|n| n.starts_with("cleanflow_")));
    }

    #[test]
    fn every_metric_has_a_phase() {
        let phases = ["cleaning", "accel", "quality_gate", "preprocess", "flow"];
        for m in MetricName::all_metrics() {
            assert!(phases.contains(&m.metadata().0), "{} has unknown phase", m);
        }
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        preprocess::rows_in(3);
        accel::fallback("invalid_shape");
        flow::duration(0.5);
    }
}
