// CLI Interface
//
// Command-line front end: run the portal server or check job and upload
// files offline.

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::PortalConfig;
use crate::job::{assemble_job, JobRequest, JobRules, ValidationOutcome};
use crate::predictors::{parse_predictor_table, PredictorMap};
use crate::server::PortalServer;
use crate::validation::parse_accession_list;

/// ZooPhy job portal
#[derive(Parser, Debug)]
#[command(name = "zoophy-portal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate and submit phylogeography jobs to the analysis service", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(global = true, long = "config", short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP portal
    Serve {
        /// Host address to bind to
        #[arg(long = "host")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long = "port")]
        port: Option<u16>,
    },

    /// Validate a job request JSON file without submitting it
    CheckJob {
        /// Path to the job JSON
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Parse a tab-separated predictor table
    ParsePredictors {
        /// Path to the .tsv file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Parse a newline separated accession list
    ParseAccessions {
        /// Path to the .txt file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

impl Cli {
    /// Run the CLI
    pub async fn run(self) -> AnyhowResult<()> {
        let config = load_config(self.config.as_deref())?;
        init_logging_impl(self.verbose, &config.log_level);

        match self.command {
            Commands::Serve { host, port } => cmd_serve_impl(config, host, port).await,
            Commands::CheckJob { file } => {
                let job = check_job_file(&file, &config)?;
                println!("{}", serde_json::to_string_pretty(&job)?);
                Ok(())
            }
            Commands::ParsePredictors { file } => {
                let predictors = parse_predictors_file(&file)?;
                println!("{}", serde_json::to_string_pretty(&predictors)?);
                Ok(())
            }
            Commands::ParseAccessions { file } => {
                let accessions = parse_accessions_file(&file, &config)?;
                println!("{}", serde_json::to_string_pretty(&accessions)?);
                Ok(())
            }
        }
    }
}

/// Initialize logging
///
/// `RUST_LOG` wins over the configured level; `--verbose` forces debug.
fn init_logging_impl(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Defaults, then the optional file, then the environment
fn load_config(path: Option<&Path>) -> AnyhowResult<PortalConfig> {
    let config = match path {
        Some(path) => PortalConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?
            .with_env_overrides(),
        None => PortalConfig::from_env(),
    };
    Ok(config)
}

/// Serve command implementation
async fn cmd_serve_impl(
    mut config: PortalConfig,
    host: Option<String>,
    port: Option<u16>,
) -> AnyhowResult<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    info!("Starting job portal on {}", config.server_url());
    let server = PortalServer::new(config)?;
    server.start().await?;
    Ok(())
}

fn read_text(path: &Path) -> AnyhowResult<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Assemble a job from a JSON file
fn check_job_file(path: &Path, config: &PortalConfig) -> AnyhowResult<JobRequest> {
    let raw: serde_json::Value = serde_json::from_str(&read_text(path)?)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let rules = JobRules::new(&config.substitution_models)?;

    match assemble_job(&raw, &rules) {
        ValidationOutcome::Valid(job) => Ok(job),
        ValidationOutcome::Invalid(message) => anyhow::bail!(message),
    }
}

fn parse_predictors_file(path: &Path) -> AnyhowResult<PredictorMap> {
    Ok(parse_predictor_table(&read_text(path)?)?)
}

fn parse_accessions_file(path: &Path, config: &PortalConfig) -> AnyhowResult<Vec<String>> {
    Ok(parse_accession_list(
        &read_text(path)?,
        config.accession_upload_limit,
    )?)
}
