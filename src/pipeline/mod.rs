// Cleaning pipeline: ingestion, processing, artifacts, and the flow that ties them together

pub mod artifacts;
pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod profile;

pub use artifacts::{ArtifactRecord, ParquetFileSink};
pub use orchestrator::{
    decide_execution_path, run_cleaning_flow, CleaningResult, ExecutionPath, FlowPorts, FlowRequest, FlowState,
};
pub use profile::Profile;
