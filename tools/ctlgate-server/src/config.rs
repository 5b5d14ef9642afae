//! Server settings
//!
//! Settings come from three layers: built-in defaults, an optional TOML
//! file, and command line flags (or their environment variables). Flags
//! override the file, the file overrides the defaults.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8000"
//!
//! [controller]
//! address = "192.168.7.2"
//! port = 65000
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ctlgate_core::{DEFAULT_CONTROLLER_PORT, DEFAULT_WS_PORT};
use ctlgate_router::GatewayConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Default)]
#[command(name = "ctlgate-server")]
#[command(about = "Share one hardware controller between many clients")]
#[command(version)]
pub struct Cli {
    /// Listen address for the WebSocket control channel
    #[arg(short, long, env = "CTLGATE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Controller host
    #[arg(long, env = "CTLGATE_CONTROLLER")]
    pub controller: Option<String>,

    /// Controller TCP port
    #[arg(long, env = "CTLGATE_CONTROLLER_PORT")]
    pub controller_port: Option<u16>,

    /// Config file path
    #[arg(short, long, env = "CTLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CTLGATE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSection {
    pub address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub json: Option<bool>,
}

/// Contents of the TOML config file; every value is optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub controller: ControllerSection,
    pub logging: LoggingSection,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Fully resolved settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub gateway: GatewayConfig,
    pub log_level: String,
    pub json_logs: bool,
}

impl Settings {
    /// Read the config file named on the command line, if any, and resolve
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(cli, file)
    }

    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let listen = cli
            .listen
            .or(file.server.listen)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_WS_PORT)));

        let gateway = GatewayConfig {
            controller_address: cli
                .controller
                .clone()
                .or(file.controller.address)
                .unwrap_or_else(|| GatewayConfig::default().controller_address),
            controller_port: cli
                .controller_port
                .or(file.controller.port)
                .unwrap_or(DEFAULT_CONTROLLER_PORT),
            ..Default::default()
        };
        gateway.validate().context("Invalid controller settings")?;

        let log_level = if cli.verbose {
            "debug".to_string()
        } else {
            cli.log_level
                .clone()
                .or(file.logging.level)
                .unwrap_or_else(|| "info".to_string())
        };

        Ok(Self {
            listen,
            gateway,
            log_level,
            json_logs: cli.json_logs || file.logging.json.unwrap_or(false),
        })
    }
}
