use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config_loader::{load_config, load_validation_config};
use crate::errors::{RelayError, RelayResult};
use crate::record_validator::{RecordValidator, ValidationFailure};

/// Top-level CLI interface for the log relay
#[derive(Parser)]
#[command(
    name = "logrelay",
    version,
    about = "Relay validated log events from Kafka to WebSocket subscribers"
)]
pub struct Cli {
    /// TOML configuration file (defaults to $LOGRELAY_CONFIG, then ./logrelay.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Defaults to `serve` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume the configured topic and serve subscribers
    Serve {
        /// Host/IP to bind, overrides server.host
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check a file of log payloads (JSON array or one JSON object per line)
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

pub fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => run_serve(config_path, host, port),
        Commands::Validate { file } => run_validate(config_path, &file),
        Commands::PrintConfig => {
            let config = load_config(config_path)?;
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn run_serve(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    crate::telemetry::init_logging(&config.logging)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    rt.block_on(crate::server::serve(config))
}

fn run_validate(config_path: Option<&Path>, file: &Path) -> anyhow::Result<()> {
    let validator = RecordValidator::new(&load_validation_config(config_path)?);
    let report = validate_file(&validator, file)?;

    for rejected in &report.rejected {
        eprintln!("Entry [{}] rejected: {}", rejected.position, rejected.failure);
        for issue in rejected.failure.issues() {
            eprintln!("    {issue}");
        }
    }
    println!(
        "{}: {} accepted, {} rejected",
        file.display(),
        report.accepted,
        report.rejected.len()
    );

    if report.rejected.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} of {} entries failed validation", report.rejected.len(), report.total())
    }
}

/// One rejected entry; `position` is the 1-based line for JSONL, 0-based index for arrays.
#[derive(Debug)]
pub struct RejectedEntry {
    pub position: usize,
    pub failure: ValidationFailure,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedEntry>,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.accepted + self.rejected.len()
    }

    fn record(&mut self, position: usize, outcome: Result<impl Sized, ValidationFailure>) {
        match outcome {
            Ok(_) => self.accepted += 1,
            Err(failure) => self.rejected.push(RejectedEntry { position, failure }),
        }
    }
}

/// Run every payload in `file` through the validator. Blank lines are skipped.
pub fn validate_file(validator: &RecordValidator, file: &Path) -> RelayResult<ValidationReport> {
    let contents = std::fs::read_to_string(file)
        .map_err(|e| RelayError::io(format!("read {}", file.display()), e))?;
    Ok(validate_contents(validator, &contents))
}

pub fn validate_contents(validator: &RecordValidator, contents: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    if contents.trim_start().starts_with('[') {
        match serde_json::from_str::<Vec<Value>>(contents) {
            Ok(entries) => {
                for (index, entry) in entries.iter().enumerate() {
                    report.record(index, validator.validate_value(entry));
                }
            }
            Err(e) => report.rejected.push(RejectedEntry {
                position: 0,
                failure: ValidationFailure::Decode {
                    message: e.to_string(),
                },
            }),
        }
        return report;
    }

    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        report.record(index + 1, validator.validate_bytes(line.as_bytes()));
    }
    report
}
