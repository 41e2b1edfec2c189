mod cli;
mod config;
mod input;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use vigil_compute::AnomalyDetectionEngine;
use vigil_core::config::load_dotenv;
use vigil_rules::load_rule_file;

use crate::cli::{CliArgs, Command, DetectArgs};
use crate::input::BatchInput;

fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    match args.command {
        Command::Detect(detect) => run_detect(&detect, &args.profile),
        Command::CheckConfig { file } => {
            let rule = load_rule_file(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            let config = rule
                .compile()
                .with_context(|| format!("rule '{}' is invalid", rule.metadata.id))?
                .with_env_overrides(&args.profile)
                .context("invalid VIGIL_* environment override")?;
            config.log_summary();
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn run_detect(args: &DetectArgs, profile: &str) -> Result<()> {
    let config = config::resolve(
        args.config.as_deref(),
        args.rules_dir.as_deref(),
        args.rule.as_deref(),
        profile,
    )?;
    let engine = AnomalyDetectionEngine::new(config).context("invalid detection config")?;

    let batch = BatchInput::read(&args.input)?.into_batch();
    info!(
        series = batch.metrics.len(),
        transactions = batch.transactions.len(),
        rejected = batch.rejected.len(),
        undecoded = batch.failures.len(),
        "batch loaded"
    );

    let mut report = engine
        .detect_all_anomalies(&batch.metrics, &batch.transactions)
        .context("detection failed")?;
    input::merge_input_problems(&mut report, batch.rejected, batch.failures);

    let output = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", output);
    Ok(())
}
