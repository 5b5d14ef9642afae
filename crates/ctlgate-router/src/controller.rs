//! The shared controller session
//!
//! One session owns the one driver link and the effective configuration,
//! the union of every configuration clients have pushed. The effective
//! configuration belongs to the session, not to the link: it survives a
//! reconnect and is pushed again in full as soon as a new link is open.

use ctlgate_core::{
    ControllerDriver, ControllerIdentity, ControllerMode, ControllerReport, DriverConnector,
    DriverError, DriverResult, FatalDisconnectHandler, PinConfiguration,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Receives fatal disconnects together with the link generation they came from
pub type FatalNotifier = Arc<dyn Fn(u64, DriverError) + Send + Sync>;

/// Observable state of the controller session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No link
    Absent,
    /// Link open in the given mode
    Connected(ControllerMode),
}

/// Owner of the driver link and the effective configuration
pub struct ControllerSession {
    connector: Arc<dyn DriverConnector>,
    address: String,
    port: u16,
    notifier: FatalNotifier,
    driver: Option<Box<dyn ControllerDriver>>,
    effective: PinConfiguration,
    /// Bumped for every link opened, so late callbacks from an old link are ignored
    generation: u64,
}

impl ControllerSession {
    pub fn new(
        connector: Arc<dyn DriverConnector>,
        address: impl Into<String>,
        port: u16,
        notifier: FatalNotifier,
    ) -> Self {
        Self {
            connector,
            address: address.into(),
            port,
            notifier,
            driver: None,
            effective: PinConfiguration::new(),
            generation: 0,
        }
    }

    pub fn state(&self) -> ControllerState {
        match &self.driver {
            None => ControllerState::Absent,
            Some(driver) => ControllerState::Connected(ControllerMode::from_online(driver.is_online())),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_some()
    }

    /// Generation of the current (or last) link
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Union of every configuration pushed so far
    pub fn effective(&self) -> &PinConfiguration {
        &self.effective
    }

    /// Return the open link, opening one first if needed.
    ///
    /// A failed attempt leaves the session absent; the next call tries again.
    pub fn ensure_connected(&mut self) -> Result<&mut dyn ControllerDriver> {
        if self.driver.is_none() {
            let driver = self.open_link()?;
            self.driver = Some(driver);
        }
        match self.driver.as_deref_mut() {
            Some(driver) => Ok(driver),
            None => Err(GatewayError::DriverUnavailable(DriverError::Disconnected(
                "link closed while connecting".to_string(),
            ))),
        }
    }

    fn open_link(&mut self) -> Result<Box<dyn ControllerDriver>> {
        let generation = self.generation + 1;
        let notifier = self.notifier.clone();
        let on_fatal: FatalDisconnectHandler = Arc::new(move |e| notifier(generation, e));

        debug!("Connecting to controller at {}:{}", self.address, self.port);
        let mut driver = self
            .connector
            .connect(&self.address, self.port, on_fatal)
            .map_err(|e| {
                warn!("Controller connection to {}:{} failed: {}", self.address, self.port, e);
                GatewayError::DriverUnavailable(e)
            })?;
        self.generation = generation;
        info!("Connected to controller at {}:{}", self.address, self.port);

        if !self.effective.is_empty() {
            debug!("Restoring effective configuration after reconnect");
            push_configuration(driver.as_mut(), &self.effective)?;
        }
        Ok(driver)
    }

    /// The open link, which must be online
    pub fn online_driver(&mut self) -> Result<&mut dyn ControllerDriver> {
        let driver = self.ensure_connected()?;
        if driver.is_online() {
            Ok(driver)
        } else {
            Err(GatewayError::NotOnline)
        }
    }

    /// Merge a client's claimed pins into the effective configuration, push
    /// it, then switch mode if asked to. The effective configuration only
    /// changes once both steps succeeded. On failure the previous
    /// configuration is pushed again; if that fails too the link is dropped,
    /// so the next connect restores it.
    pub fn apply(&mut self, claimed: &PinConfiguration, mode: Option<ControllerMode>) -> Result<()> {
        let previous = self.effective;
        let mut effective = previous;
        effective.merge(claimed);

        let driver = self.ensure_connected()?;
        let outcome = match push_configuration(driver, &effective) {
            Ok(()) => switch_mode(driver, mode),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            warn!("Applying configuration failed, restoring the previous one: {}", e);
            if let Err(restore) = push_configuration(driver, &previous) {
                warn!("Restoring configuration failed: {}", restore);
                self.discard();
            }
            return Err(e.into());
        }

        self.effective = effective;
        Ok(())
    }

    /// Connectivity and mode, without touching the link
    pub fn generic_report(&self) -> ControllerReport {
        match self.state() {
            ControllerState::Absent => ControllerReport::disconnected(),
            ControllerState::Connected(mode) => ControllerReport::connected(mode),
        }
    }

    /// Connectivity, mode, name and firmware version, connecting if needed
    pub fn full_report(&mut self) -> Result<ControllerReport> {
        let driver = self.ensure_connected()?;
        let status = driver.query_status()?;
        let mode = ControllerMode::from_online(driver.is_online());
        Ok(ControllerReport::connected(mode).with_identity(ControllerIdentity::from(&status)))
    }

    /// Stop everything and drop the link. No-op when absent.
    pub fn teardown(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        info!("Shutting down controller session");
        log_stop("stop all", driver.stop_all());
        log_stop("stop camera", driver.stop_camera_online());
        log_stop("stop online", driver.stop_online());
    }

    /// Drop a link that already failed. No stop sequence: the link is gone.
    pub fn discard(&mut self) {
        if self.driver.take().is_some() {
            warn!("Controller link discarded");
        }
    }
}

impl std::fmt::Debug for ControllerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSession")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("state", &self.state())
            .field("effective", &self.effective)
            .field("generation", &self.generation)
            .finish()
    }
}

fn push_configuration(driver: &mut dyn ControllerDriver, config: &PinConfiguration) -> DriverResult<()> {
    let encoding = config.driver_encoding();
    driver.set_config(encoding.outputs, encoding.inputs)?;
    driver.update_config()
}

fn switch_mode(driver: &mut dyn ControllerDriver, mode: Option<ControllerMode>) -> DriverResult<()> {
    match mode {
        Some(ControllerMode::Online) if !driver.is_online() => {
            info!("Switching controller online");
            driver.start_online()
        }
        Some(ControllerMode::Offline) if driver.is_online() => {
            info!("Switching controller offline");
            driver.stop_online()
        }
        _ => Ok(()),
    }
}

fn log_stop(step: &str, result: DriverResult<()>) {
    if let Err(e) = result {
        warn!("Controller {} failed during shutdown: {}", step, e);
    }
}
