mod bootstrap;
mod health;
mod webhook;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rdbridge_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "rdbridge-server",
    version,
    about = "Relay Mercos customer webhooks into RD Station contacts"
)]
struct Cli {
    #[arg(
        long,
        short,
        help = "Path to rdbridge.toml (defaults to ./rdbridge.toml or ./config/rdbridge.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(long, help = "Address to bind the HTTP listener to")]
    bind_address: Option<String>,
    #[arg(long, help = "Port to listen on")]
    port: Option<u16>,
    #[arg(long, help = "Log level or tracing filter (e.g. info, rdbridge=debug)")]
    log_level: Option<String>,
    #[arg(long, help = "Log output format: compact, pretty or json")]
    log_format: Option<LogFormat>,
    #[arg(long, help = "RD Station API base URL")]
    rdstation_base_url: Option<String>,
}

impl Cli {
    fn load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                bind_address: self.bind_address,
                port: self.port,
                log_level: self.log_level,
                log_format: self.log_format,
                rdstation_base_url: self.rdstation_base_url,
            },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use rdbridge_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.trim().to_ascii_lowercase()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    // Logging depends on config, so config errors surface on stderr via anyhow.
    let config = AppConfig::load(cli.load_options())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "rdbridge-server listening"
    );
    axum::serve(listener, app.http_router()).with_graceful_shutdown(wait_for_shutdown()).await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "rdbridge-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
