use thiserror::Error;

use crate::pipeline::processing::quality_gate::GateFailure;

#[derive(Error, Debug)]
pub enum CleanflowError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion error: {0}")]
    Ingest(String),

    #[error("{context} invalid: {}", errors.join("; "))]
    InvalidSpec { context: String, errors: Vec<String> },

    #[error(transparent)]
    QualityGate(#[from] GateFailure),

    #[error(
        "local parquet generation invalid at {path}; strict mode enabled (set local_parquet_strict=false to bypass)"
    )]
    StrictParquet { path: String },

    #[error("cleaning produced empty result (allow_empty_output=false)")]
    EmptyOutput,

    #[error("Job reporter error: {0}")]
    Reporter(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, CleanflowError>;
