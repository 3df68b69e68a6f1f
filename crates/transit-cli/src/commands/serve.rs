//! Serve command - run the HTTP user service.

use std::path::{Path, PathBuf};

use anyhow::Result;
use transit_gateway::GatewayConfig;

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

/// Start the user service and block until Ctrl+C.
pub async fn run_serve(config_path: Option<&Path>, args: ServeArgs) -> Result<()> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if args.data_dir.is_some() {
        config.server.data_dir = args.data_dir;
    }

    if config.auth.jwt_secret.is_none() {
        ui::error("No signing secret configured");
        ui::info("Set TRANSIT_JWT_SECRET or auth.jwtSecret in the config file");
        anyhow::bail!("JWT secret is not defined");
    }

    let gateway_config = GatewayConfig::from(&config);

    ui::header("Starting Transit User Service");
    ui::kv(
        "Address",
        &format!("{}:{}", gateway_config.bind_address, gateway_config.port),
    );
    ui::kv("Data", &gateway_config.data_dir.display().to_string());
    ui::kv(
        "Access tokens",
        &format!("{}h", config.auth.access_token_expiry_hours),
    );
    ui::kv(
        "Refresh tokens",
        &format!("{}d", config.auth.refresh_token_expiry_days),
    );
    println!();
    ui::info("Press Ctrl+C to stop");
    println!();

    transit_gateway::start(gateway_config).await?;

    Ok(())
}
