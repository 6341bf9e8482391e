use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use solo_server::ServerConfig;
use solo_telemetry::{init_telemetry, TelemetryConfig};

/// WebSocket echo front end backed by a single session instance.
#[derive(Debug, Parser)]
#[command(name = "solo", version)]
struct Args {
    /// TOML config file. Flags below override its values.
    #[arg(short, long, env = "SOLO_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SOLO_HOST")]
    host: Option<String>,

    #[arg(short, long, env = "SOLO_PORT")]
    port: Option<u16>,

    /// Logical name all connections resolve to.
    #[arg(long, env = "SOLO_NAME")]
    name: Option<String>,

    /// URL of the outbound call timed for every message.
    #[arg(long, env = "SOLO_DEPENDENCY_URL")]
    dependency_url: Option<String>,

    /// Persist warn+ logs to this SQLite database.
    #[arg(long, env = "SOLO_LOG_DB")]
    log_db: Option<PathBuf>,
}

impl Args {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = &self.name {
            config.logical_name = name.clone();
        }
        if let Some(url) = &self.dependency_url {
            config.dependency_url = url.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_db_path: args.log_db.clone(),
        ..Default::default()
    });

    let config = args.server_config().context("loading configuration")?;
    tracing::info!(
        bind = %config.bind_addr(),
        logical_name = %config.logical_name,
        dependency_url = %config.dependency_url,
        "starting solo"
    );

    let handle = solo_server::start(config, telemetry.metrics())
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, "solo ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
