//! Filebridge
//!
//! Browse and stream a home directory and SFTP hosts over HTTP.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use server::config::{default_config_path, Config};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Filebridge - browse and stream files over HTTP.
#[derive(Parser, Debug)]
#[command(name = "filebridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to listen on, overriding the configuration
        #[arg(long, short, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Validate the configuration and print it as TOML
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    let command = cli.command.unwrap_or(Commands::Serve { bind: None });
    if let Commands::Serve { bind: Some(bind) } = &command {
        config.server.bind = bind.clone();
    }

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    match command {
        Commands::CheckConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Serve { .. } => {
            let _guard = init_logging(&config, cli.verbose)?;
            tracing::info!(config = %config_path.display(), "Filebridge starting");
            run_server(config).await
        }
    }
}

/// Install the global subscriber: stderr, plus a daily log file when configured.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if verbose {
        "debug"
    } else {
        config.server.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", default_level)));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if config.server.log_file.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .try_init()
            .context("Failed to initialize logging")?;
        return Ok(None);
    }

    let log_file = Path::new(&config.server.log_file);
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = log_file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("filebridge.log");
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(Some(guard))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tracing::info!(
        bind = %config.server.bind,
        root = %config.storage.resolved_root().display(),
        hosts = config.remote.hosts.len(),
        "Listening"
    );

    axum::serve(listener, server::app(&config))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Filebridge stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register SIGTERM handler");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Received Ctrl-C");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command() {
        let cli = Cli::try_parse_from(["filebridge"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::try_parse_from(["filebridge", "serve"]).unwrap();
        match cli.command {
            Some(Commands::Serve { bind }) => assert!(bind.is_none()),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_bind() {
        let cli = Cli::try_parse_from(["filebridge", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        match cli.command {
            Some(Commands::Serve { bind }) => assert_eq!(bind.as_deref(), Some("127.0.0.1:9000")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_check_config_command() {
        let cli = Cli::try_parse_from(["filebridge", "check-config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["filebridge", "serve", "-v", "-c", "/etc/fb.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/fb.toml")));
    }

    #[test]
    fn test_invalid_command_fails() {
        assert!(Cli::try_parse_from(["filebridge", "explode"]).is_err());
    }
}
