use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Multi-method anomaly detection over metric series and transaction batches.
#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Anomaly detection for metric streams and transactions")]
pub struct CliArgs {
    /// Env profile: `{PROFILE}_VIGIL_*` variables win over `VIGIL_*`
    #[arg(long, env = "VIGIL_PROFILE", default_value = "", global = true)]
    pub profile: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the engine over a JSON batch and print the report
    Detect(DetectArgs),

    /// Validate a DetectionConfig rule file and print the effective config
    CheckConfig {
        /// Rule file (YAML)
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Batch file: `{"metrics": {name: [..]}, "transactions": [..]}`
    #[arg(long, short)]
    pub input: PathBuf,

    /// DetectionConfig rule file (defaults apply when omitted)
    #[arg(long, env = "VIGIL_CONFIG", conflicts_with = "rules_dir")]
    pub config: Option<PathBuf>,

    /// Directory of rules; pick one with `--rule`
    #[arg(long, requires = "rule")]
    pub rules_dir: Option<PathBuf>,

    /// Rule id inside `--rules-dir`
    #[arg(long, requires = "rules_dir")]
    pub rule: Option<String>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,
}
