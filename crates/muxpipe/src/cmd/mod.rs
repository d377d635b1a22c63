use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use muxpipe_peer::IdentityConfig;
use muxpipe_transport::LOCALHOST;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod collect;
pub mod fingerprint;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and print what senders write.
    Collect(CollectArgs),
    /// Send one payload (or stdin lines) to a collector.
    Send(SendArgs),
    /// Print the fingerprint this process would send.
    Fingerprint(FingerprintArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Collect(args) => collect::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Fingerprint(args) => fingerprint::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Ports to listen on (comma-separated). 0 picks a free port.
    #[arg(
        long,
        short = 'p',
        value_delimiter = ',',
        default_value = "0",
        allow_negative_numbers = true
    )]
    pub port: Vec<i64>,
    /// Interface to bind.
    #[arg(long, default_value = LOCALHOST)]
    pub host: String,
    /// Write the bound ports as a JSON array to this file.
    #[arg(long, value_name = "PATH", env = "MUXPIPE_PORTS_FILE")]
    pub ports_file: Option<PathBuf>,
    /// Only print these streams (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub streams: Option<Vec<u32>>,
    /// Print metrics payloads as frames instead of decoding them.
    #[arg(long)]
    pub raw_metrics: bool,
    /// Exit after printing N frames or metric values.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Collector address (`host:port` or a bare port on loopback).
    #[arg(long, short = 'e', env = "MUXPIPE_ENDPOINT", conflicts_with = "ports_file")]
    pub endpoint: Option<String>,
    /// Ports file to read the collector port from.
    #[arg(long, value_name = "PATH", env = "MUXPIPE_PORTS_FILE")]
    pub ports_file: Option<PathBuf>,
    /// Collector host when the port comes from a ports file.
    #[arg(long, default_value = LOCALHOST)]
    pub host: String,
    /// Stream to send on.
    #[arg(long, short = 's', default_value = "1")]
    pub stream: u32,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file", "stdin"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file", "stdin"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data", "stdin"])]
    pub file: Option<PathBuf>,
    /// Send each line of stdin as its own frame.
    #[arg(long, conflicts_with_all = ["json", "data", "file"])]
    pub stdin: bool,
    /// Publish a metric value on the metrics stream (repeatable).
    #[arg(long = "metric", value_name = "ID=VALUE")]
    pub metrics: Vec<String>,
    /// How long to wait for the collector to take everything (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub identity: IdentityArgs,
}

#[derive(Args, Debug)]
pub struct FingerprintArgs {
    #[command(flatten)]
    pub identity: IdentityArgs,
}

#[derive(Args, Debug, Default)]
pub struct IdentityArgs {
    /// Configuration name reported in the fingerprint.
    #[arg(long)]
    pub config_name: Option<String>,
    /// Comment reported in the fingerprint.
    #[arg(long)]
    pub comment: Option<String>,
    /// Service name reported in the fingerprint.
    #[arg(long)]
    pub name: Option<String>,
    /// Service description reported in the fingerprint.
    #[arg(long)]
    pub description: Option<String>,
}

impl IdentityArgs {
    pub fn to_config(&self) -> IdentityConfig {
        let defaults = IdentityConfig::default();
        IdentityConfig {
            config_name: self.config_name.clone().unwrap_or(defaults.config_name),
            comment: self.comment.clone().unwrap_or(defaults.comment),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn identity_args_fall_back_to_placeholders() {
        let config = IdentityArgs::default().to_config();
        assert_eq!(config, IdentityConfig::default());

        let config = IdentityArgs {
            name: Some("ingest".to_string()),
            config_name: Some("prod.toml".to_string()),
            ..IdentityArgs::default()
        }
        .to_config();
        assert_eq!(config.name.as_deref(), Some("ingest"));
        assert_eq!(config.config_name, "prod.toml");
        assert_eq!(config.comment, IdentityConfig::default().comment);
    }
}
