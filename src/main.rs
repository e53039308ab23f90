use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

use users_dataset::config::Config;
use users_dataset::logging;
use users_dataset::observability::metrics;
use users_dataset::pipeline::processing::{QualityGate, RuleSet};
use users_dataset::{DataQualityReport, Pipeline};

#[derive(Parser)]
#[command(name = "users_dataset")]
#[command(about = "Builds the per-user first-recording dataset from the users and recordings exports")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to config.toml (defaults to $USERS_DATASET_CONFIG or ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and write the dataset
    Run {
        /// Users export (overrides config)
        #[arg(long)]
        users: Option<PathBuf>,
        /// Recordings export (overrides config)
        #[arg(long)]
        recordings: Option<PathBuf>,
        /// Output table (overrides config)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Outlier rules file (overrides config)
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Also write the data quality report as JSON
        #[arg(long)]
        report_json: Option<PathBuf>,
    },
    /// Load and validate the outlier rules without touching any data
    CheckRules {
        /// Outlier rules file (overrides config)
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

fn load_gate(config: &Config) -> anyhow::Result<QualityGate> {
    let rules = RuleSet::load(&config.validation.rules_path)?;
    let gate = QualityGate::from_validation_config(rules, &config.validation)
        .context("outlier ruleset rejected")?;
    Ok(gate)
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let config_path = Config::resolve_path(cli.config);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    match cli.command {
        Commands::Run { users, recordings, output, rules, report_json } => {
            if let Some(p) = users {
                config.input.users_path = p;
            }
            if let Some(p) = recordings {
                config.input.recordings_path = p;
            }
            if let Some(p) = output {
                config.output.path = p;
            }
            if let Some(p) = rules {
                config.validation.rules_path = p;
            }

            metrics::init();
            let gate = load_gate(&config)?;
            let pipeline = Pipeline::new(&config, gate)?;

            let mut report = DataQualityReport::new();
            let outcome = pipeline.run(&mut report);

            println!("\n{}", report);
            if let Some(path) = report_json {
                fs::write(&path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!("Wrote data quality report to {}", path.display());
            }
            if let Some(path) = &config.output.metrics_path {
                if let Err(e) = metrics::write_snapshot(path) {
                    warn!("Failed to write metrics snapshot: {}", e);
                }
            }

            match outcome {
                Ok(result) => {
                    println!("📊 Dataset build results:");
                    println!("   Accounts: {}", result.accounts);
                    println!("   Recordings: {}", result.recordings);
                    println!("   Rows written: {}", result.rows_written);
                    println!("   Output file: {}", result.output_file.display());
                }
                Err(e) => {
                    error!("Dataset build failed: {}", e);
                    println!("❌ Dataset build failed, no output written: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::CheckRules { rules } => {
            if let Some(p) = rules {
                config.validation.rules_path = p;
            }
            let gate = load_gate(&config)?;
            let set = gate.rules();
            println!("✅ {} outlier rule(s) OK ({})", set.rules.len(), set.version);
            for rule in &set.rules {
                println!("   - {}", rule);
            }
        }
    }
    Ok(())
}
