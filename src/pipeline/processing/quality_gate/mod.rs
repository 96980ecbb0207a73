use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::coerce::{to_decimal, to_int};
use crate::rules::rule_param;
use crate::types::QualityStats;

/// Which threshold tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    MaxInvalidRows,
    MaxFilteredRows,
    MinOutputRows,
    MaxInvalidRatio,
}

impl GateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateKind::MaxInvalidRows => "max_invalid_rows",
            GateKind::MaxFilteredRows => "max_filtered_rows",
            GateKind::MinOutputRows => "min_output_rows",
            GateKind::MaxInvalidRatio => "max_invalid_ratio",
        }
    }

    fn observed_name(&self) -> &'static str {
        match self {
            GateKind::MaxInvalidRows => "invalid_rows",
            GateKind::MaxFilteredRows => "filtered_rows",
            GateKind::MinOutputRows => "output_rows",
            GateKind::MaxInvalidRatio => "invalid_ratio",
        }
    }

    fn relation(&self) -> &'static str {
        match self {
            GateKind::MinOutputRows => "below",
            _ => "exceeds",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violated gate, naming the configured threshold and the observed value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "quality gate failed: {}={observed} {} {gate}={threshold}",
    .gate.observed_name(),
    .gate.relation()
)]
pub struct GateFailure {
    pub gate: GateKind,
    pub threshold: String,
    pub observed: String,
}

/// Optional thresholds; `None` means the gate is not configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityGateConfig {
    pub max_invalid_rows: Option<i64>,
    pub max_filtered_rows: Option<i64>,
    pub min_output_rows: Option<i64>,
    pub max_invalid_ratio: Option<Decimal>,
}

impl QualityGateConfig {
    /// Reads thresholds from `params.rules`, falling back to top-level `params`.
    pub fn from_params(params: &Value) -> Self {
        Self {
            max_invalid_rows: rule_param(params, "max_invalid_rows").and_then(to_int),
            max_filtered_rows: rule_param(params, "max_filtered_rows").and_then(to_int),
            min_output_rows: rule_param(params, "min_output_rows").and_then(to_int),
            max_invalid_ratio: rule_param(params, "max_invalid_ratio").and_then(to_decimal),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Record of a passed evaluation: which gates were configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub max_invalid_rows: Option<i64>,
    pub max_filtered_rows: Option<i64>,
    pub min_output_rows: Option<i64>,
    pub max_invalid_ratio: Option<f64>,
    pub evaluated: bool,
}

/// Trait for post-hoc checks over cleaning statistics
pub trait QualityGate {
    /// Checks `stats` without mutating them; the first violated gate is returned as the error.
    fn evaluate(&self, stats: &QualityStats) -> Result<GateEvaluation, GateFailure>;
}

/// Fixed-order threshold gate: invalid rows, filtered rows, output rows, invalid ratio.
#[derive(Debug, Clone, Default)]
pub struct ThresholdQualityGate {
    pub config: QualityGateConfig,
}

impl ThresholdQualityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: QualityGateConfig) -> Self {
        Self { config }
    }

    fn invalid_ratio(stats: &QualityStats) -> Decimal {
        if stats.input_rows == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(stats.invalid_rows) / Decimal::from(stats.input_rows)
        }
    }
}

fn ratio_text(d: Decimal) -> String {
    format!("{:.6}", d.to_f64().unwrap_or(0.0))
}

impl QualityGate for ThresholdQualityGate {
    fn evaluate(&self, stats: &QualityStats) -> Result<GateEvaluation, GateFailure> {
        let cfg = &self.config;
        let fail = |gate: GateKind, threshold: String, observed: String| GateFailure {
            gate,
            threshold,
            observed,
        };

        if let Some(max) = cfg.max_invalid_rows {
            if stats.invalid_rows as i128 > max as i128 {
                return Err(fail(GateKind::MaxInvalidRows, max.to_string(), stats.invalid_rows.to_string()));
            }
        }
        if let Some(max) = cfg.max_filtered_rows {
            if stats.filtered_rows as i128 > max as i128 {
                return Err(fail(GateKind::MaxFilteredRows, max.to_string(), stats.filtered_rows.to_string()));
            }
        }
        if let Some(min) = cfg.min_output_rows {
            if (stats.output_rows as i128) < min as i128 {
                return Err(fail(GateKind::MinOutputRows, min.to_string(), stats.output_rows.to_string()));
            }
        }
        if let Some(max) = cfg.max_invalid_ratio {
            let ratio = Self::invalid_ratio(stats);
            if ratio > max {
                return Err(fail(GateKind::MaxInvalidRatio, ratio_text(max), ratio_text(ratio)));
            }
        }

        Ok(GateEvaluation {
            max_invalid_rows: cfg.max_invalid_rows,
            max_filtered_rows: cfg.max_filtered_rows,
            min_output_rows: cfg.min_output_rows,
            max_invalid_ratio: cfg.max_invalid_ratio.and_then(|d| d.to_f64()),
            evaluated: true,
        })
    }
}
