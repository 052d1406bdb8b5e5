// CLI module - infergov command-line interface

mod output;

use crate::config::GovernorConfig;
use crate::error::{GovernorError, Result};
use crate::process::ServerProbe;
use crate::service::GovernorService;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

/// infergov - supervise and govern a local inference server
#[derive(Parser)]
#[command(name = "infergov")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the model server and govern it until interrupted
    Run {
        /// Configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,

        /// Seconds between status reports
        #[arg(long, default_value = "60")]
        report_secs: u64,
    },

    /// Load and validate a configuration file
    Validate {
        /// Configuration file (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Probe an already running model server once
    Probe {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "8001")]
        port: u16,

        /// Probe timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                config,
                report_secs,
            } => run(&config, Duration::from_secs(report_secs.max(1))).await,
            Commands::Validate { config } => validate(&config),
            Commands::Probe {
                host,
                port,
                timeout_ms,
            } => probe(&host, port, Duration::from_millis(timeout_ms)).await,
        }
    }
}

async fn run(config_path: &Path, report_interval: Duration) -> Result<()> {
    let config = GovernorConfig::from_file(config_path)?;
    let service = GovernorService::new(config)?;

    if !service.start().await {
        service.shutdown().await;
        return Err(GovernorError::ServerUnavailable(
            "model server failed to start".to_string(),
        ));
    }

    output::print_success_msg("Model server is healthy, governor running");
    output::print_status_report(&service.status_report().await);

    let mut ticker = tokio::time::interval(report_interval);
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                output::print_status_report(&service.status_report().await);
            }
        }
    }

    service.shutdown().await;
    output::print_success_msg("Governor stopped");
    Ok(())
}

fn validate(config_path: &Path) -> Result<()> {
    let config = GovernorConfig::from_file(config_path)?;
    output::print_config_summary(config_path, &config);
    Ok(())
}

async fn probe(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let probe = ServerProbe::new(format!("http://{}:{}", host, port), timeout);

    let health = probe.health().await;
    let metrics = match probe.metrics().await {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!("Metrics unavailable: {}", e);
            None
        }
    };

    output::print_probe(probe.base_url(), &health, metrics.as_ref());
    health.map(|_| ())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "infergov",
            "run",
            "--config",
            "governor.toml",
            "--report-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Run {
                config,
                report_secs,
            } => {
                assert_eq!(config, PathBuf::from("governor.toml"));
                assert_eq!(report_secs, 5);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_probe_defaults() {
        let cli = Cli::try_parse_from(["infergov", "--log-level", "debug", "probe"]).unwrap();

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Probe {
                host,
                port,
                timeout_ms,
            } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8001);
                assert_eq!(timeout_ms, 5000);
            }
            _ => panic!("expected probe command"),
        }
    }

    #[test]
    fn test_validate_requires_config() {
        assert!(Cli::try_parse_from(["infergov", "validate"]).is_err());
    }
}
