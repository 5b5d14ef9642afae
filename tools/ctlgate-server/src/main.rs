//! ctlgate Server
//!
//! Serves the gateway's control channel over WebSocket so many clients can
//! share one controller.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use ctlgate_router::{Gateway, SimulatedConnector};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Cli, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli)?;

    setup_logging(&settings.log_level, settings.json_logs)?;

    info!("Starting ctlgate server");
    info!("Listening on: ws://{}{}", settings.listen, ctlgate_core::CONTROL_PATH);
    info!(
        "Controller at {}:{}",
        settings.gateway.controller_address, settings.gateway.controller_port
    );

    // The hardware wire protocol is provided by an external driver; the
    // bundled connector simulates the controller.
    let gateway = Gateway::new(settings.gateway.clone(), Arc::new(SimulatedConnector::new()));

    let addr = settings.listen.to_string();
    let server = gateway.clone();
    let serve = tokio::spawn(async move { server.serve_websocket(&addr).await });

    tokio::select! {
        result = serve => {
            match result {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => {
                    error!("Server error: {}", e);
                    return Err(e).context("Gateway server failed");
                }
                Err(e) => return Err(e).context("Server task failed"),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
            gateway.stop();
            for id in gateway.connection_ids() {
                gateway.disconnect(&id);
            }
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}
