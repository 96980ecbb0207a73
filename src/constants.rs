/// Shared constants for the cleaning flow, preprocessing and remote acceleration.

// Remote acceleration service
pub const DEFAULT_ACCEL_URL: &str = "http://127.0.0.1:18082";
pub const DEFAULT_ACCEL_TIMEOUT_SECS: u64 = 10;
pub const ACCEL_TRANSFORM_PATH: &str = "/operators/transform_rows_v2";

// Job bookkeeping service
pub const DEFAULT_BASE_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_BUS_DIR_NAME: &str = "CLEANFLOW";
pub const CLEANING_STEP_ID: &str = "cleaning";

/// Marker found at both ends of every valid parquet file.
pub const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// Written instead of a real parquet file when the writer cannot produce one.
pub const PARQUET_PLACEHOLDER: &[u8] = b"PARQUET_PLACEHOLDER\n";

pub const DEFAULT_NULL_TOKENS: [&str; 4] = ["null", "none", "na", "n/a"];

pub const DEFAULT_DATE_INPUT_FORMATS: [&str; 5] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y-%m-%d %H:%M:%S",
];
pub const DEFAULT_DATE_OUTPUT_FORMAT: &str = "%Y-%m-%d";

pub const DEFAULT_POSITIVE_WORDS: [&str; 5] = ["support", "true", "yes", "approve", "agree"];
pub const DEFAULT_NEGATIVE_WORDS: [&str; 5] = ["oppose", "false", "no", "reject", "disagree"];

pub const DEFAULT_AMOUNT_ROUND_DIGITS: u32 = 2;
pub const MAX_AMOUNT_ROUND_DIGITS: i64 = 6;
pub const DEFAULT_CHUNK_MAX_CHARS: usize = 500;

// Artifact identifiers reported for a cleaning step
pub const ARTIFACT_CSV_ID: &str = "csv_cleaned_001";
pub const ARTIFACT_PARQUET_ID: &str = "parquet_cleaned_001";
pub const ARTIFACT_PROFILE_ID: &str = "profile_json_001";
