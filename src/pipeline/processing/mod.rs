// Pipeline processing: rule-driven cleaning, quality gating, and preprocessing

pub mod cleaning;
pub mod preprocess;
pub mod quality_gate;

pub use cleaning::{clean_rows, evaluator_for, LocalEngine, RuleEvaluator};
pub use quality_gate::{GateFailure, QualityGate, QualityGateConfig, ThresholdQualityGate};
