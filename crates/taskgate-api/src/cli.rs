//! Command-line interface for the `taskgate` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use taskgate_observe::LogFormat;

/// Admission gate and webhook trigger server for agent Tasks.
#[derive(Parser)]
#[command(name = "taskgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Detailed output (-v for debug, -vv for trace). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format: pretty or json.
    #[arg(long, global = true, default_value = "pretty", env = "TASKGATE_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default tracing directive for the chosen verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "info,taskgate_api=debug,taskgate_core=debug,taskgate_infra=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the webhook server and the Task and trigger controllers.
    Serve(ServeArgs),

    /// Parse manifests and check trigger specs without starting anything.
    Validate {
        /// Manifest file or directory.
        path: PathBuf,
    },
}

#[derive(Args)]
pub struct ServeArgs {
    /// Config file (TOML). Missing file means defaults.
    #[arg(short, long, env = "TASKGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override `server.host`.
    #[arg(long)]
    pub host: Option<String>,

    /// Override `server.port`.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Manifest file or directory loaded into the store at startup.
    #[arg(short, long, env = "TASKGATE_MANIFESTS")]
    pub manifests: Option<PathBuf>,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long)]
    pub otel: bool,

    /// Do not resolve webhook secrets from `TASKGATE_SECRET_*` variables.
    #[arg(long)]
    pub no_env_secrets: bool,

    /// Let in-memory workloads succeed on their own after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub simulate_runtime: Option<u64>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from([
            "taskgate",
            "-v",
            "serve",
            "--port",
            "9000",
            "--manifests",
            "deploy/",
            "--simulate-runtime",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.log_directive(), "info,taskgate_api=debug,taskgate_core=debug,taskgate_infra=debug");
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, Some(9000));
                assert_eq!(args.manifests, Some(PathBuf::from("deploy/")));
                assert_eq!(args.simulate_runtime, Some(3));
                assert!(args.host.is_none());
                assert!(!args.otel);
            }
            Commands::Validate { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_log_format() {
        let cli = Cli::try_parse_from(["taskgate", "--log-format", "json", "validate", "m.yaml"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["taskgate", "--log-format", "xml", "validate", "m.yaml"]).is_err());
    }
}
