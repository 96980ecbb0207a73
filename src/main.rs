use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use cleanflow::config::FlowConfig;
use cleanflow::logging;
use cleanflow::observability;
use cleanflow::pipeline::artifacts::is_valid_parquet_file;
use cleanflow::pipeline::processing::preprocess::{
    preprocess_file, run_preprocess_pipeline, validate_preprocess_spec, PreprocessSpec,
};
use cleanflow::pipeline::{run_cleaning_flow, FlowPorts, FlowRequest};
use cleanflow::rules::validator::validate_cleaning_rules;

#[derive(Parser)]
#[command(name = "cleanflow")]
#[command(about = "Rule-driven row cleaning with quality gates and remote acceleration fallback")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML config file (defaults to ./cleanflow.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to a daily file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Print a Prometheus metrics snapshot to stderr before exiting
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cleaning step for one job
    Clean {
        /// Job identifier (a random one is generated when omitted)
        #[arg(long)]
        job_id: Option<String>,
        /// JSON file holding the job params
        #[arg(long)]
        params: PathBuf,
        #[arg(long, default_value = "local")]
        actor: String,
        #[arg(long, default_value = "v1")]
        ruleset_version: String,
    },
    /// Check a cleaning rules document
    ValidateRules {
        /// Rules or job params JSON file
        path: PathBuf,
    },
    /// Preprocess one file with a single spec
    Preprocess {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// JSON file holding the preprocess spec (defaults apply when omitted)
        #[arg(long)]
        spec: Option<PathBuf>,
    },
    /// Run a multi-stage preprocess pipeline
    Pipeline {
        #[arg(long)]
        input: PathBuf,
        /// JSON file holding the pipeline definition
        #[arg(long)]
        pipeline: PathBuf,
        #[arg(long)]
        stage_dir: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check whether a file looks like a real parquet file
    CheckParquet { path: PathBuf },
}

fn load_json(path: &Path) -> Result<Value> {
    let data = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Clean {
            job_id,
            params,
            actor,
            ruleset_version,
        } => {
            let config = FlowConfig::load(cli.config.as_deref())?;
            let params = load_json(&params)?;
            let request = FlowRequest {
                job_id: job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                actor,
                ruleset_version,
                params,
            };
            let ports = FlowPorts::for_job(&config, &request.params)?;
            let result = run_cleaning_flow(&request, &config, &ports)
                .with_context(|| format!("cleaning failed for job {}", request.job_id))?;
            print_json(&result)?;
            Ok(0)
        }
        Commands::ValidateRules { path } => {
            let report = validate_cleaning_rules(&load_json(&path)?);
            print_json(&report)?;
            Ok(if report.ok { 0 } else { 2 })
        }
        Commands::Preprocess { input, output, spec } => {
            let spec = match spec {
                Some(path) => load_json(&path)?,
                None => Value::Object(Default::default()),
            };
            let report = validate_preprocess_spec(&spec);
            if !report.ok {
                bail!("invalid preprocess spec: {}", report.errors.join("; "));
            }
            let result = preprocess_file(&input, &output, &PreprocessSpec::from_value(&spec))?;
            print_json(&result)?;
            Ok(0)
        }
        Commands::Pipeline {
            input,
            pipeline,
            stage_dir,
            output,
        } => {
            let pipeline = load_json(&pipeline)?;
            let job_root = stage_dir.parent().map(Path::to_path_buf).unwrap_or_default();
            let result = run_preprocess_pipeline(&pipeline, &job_root, &stage_dir, &input, output.as_deref())?;
            print_json(&result)?;
            Ok(0)
        }
        Commands::CheckParquet { path } => {
            if is_valid_parquet_file(&path) {
                println!("valid");
                Ok(0)
            } else {
                println!("invalid");
                Ok(1)
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_dir.as_deref());
    let print_metrics = cli.print_metrics;
    if print_metrics {
        observability::init()?;
    }

    let outcome = run(cli);

    if print_metrics {
        if let Some(snapshot) = observability::render() {
            eprintln!("{}", snapshot);
        }
    }

    match outcome {
        Ok(0) => Ok(()),
        Ok(code) => {
            info!(exit_code = code, "command finished with non-zero status");
            std::process::exit(code)
        }
        Err(e) => {
            error!(error = %e, "command failed");
            Err(e)
        }
    }
}
