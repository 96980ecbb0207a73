use anyhow::{Context, Result};
use clap::Parser;
use cleanflow::rules::validator::validate_cleaning_rules;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::{fs, path::PathBuf};

/// Validate a cleaning rules document, optionally against a JSON Schema too.
#[derive(Parser, Debug)]
#[command(name = "validate-rules", version, about = "Validate cleaning rules JSON")]
struct Cli {
    /// Path to the rules (or full job params) JSON file
    path: PathBuf,

    /// Optional JSON Schema the document must also satisfy
    #[arg(long)]
    schema: Option<PathBuf>,
}

fn load_json(path: &PathBuf) -> Result<Value> {
    let data = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let json: Value =
        serde_json::from_str(&data).with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
    Ok(json)
}

fn schema_problems(schema: &'static Value, instance: &Value) -> Result<Vec<String>> {
    let compiled = JSONSchema::options()
        .compile(schema)
        .context("Failed to compile JSON Schema")?;
    let mut problems = Vec::new();
    let result = compiled.validate(instance);
    if let Err(errors) = result {
        problems.extend(errors.map(|e| format!("{} at {}", e, e.instance_path)));
    };
    Ok(problems)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let instance = load_json(&args.path)?;
    let mut problems: Vec<String> = Vec::new();

    if let Some(schema_path) = &args.schema {
        // jsonschema 0.17 borrows the schema for the compiled validator's lifetime
        let schema_static: &'static Value = Box::leak(Box::new(load_json(schema_path)?));
        problems.extend(schema_problems(schema_static, &instance)?);
    }

    let report = validate_cleaning_rules(&instance);
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    problems.extend(report.errors);

    if problems.is_empty() {
        println!("valid");
        Ok(())
    } else {
        eprintln!("invalid:");
        for problem in problems {
            eprintln!("- {}", problem);
        }
        std::process::exit(2)
    }
}
