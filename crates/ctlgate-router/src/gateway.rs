//! The gateway
//!
//! Many client connections share one controller. The connection registry
//! and the controller session sit behind a single lock: configuration
//! pushes, actuation batches, registry changes and fatal disconnects are all
//! serialized, so the "last connection left" check and the teardown that
//! follows it can never be split by a newly arriving connection.
//!
//! # Example
//!
//! ```no_run
//! use ctlgate_router::{Gateway, GatewayConfig, SimulatedConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::new(GatewayConfig::default(), Arc::new(SimulatedConnector::new()));
//!     gateway.serve_websocket("0.0.0.0:8000").await.unwrap();
//! }
//! ```

use ctlgate_core::{
    DriverConnector, DriverError, PinConfiguration, Reply, Request, RequestRegistry,
    DEFAULT_CONTROLLER_PORT,
};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::controller::{ControllerSession, ControllerState, FatalNotifier};
use crate::error::{GatewayError, Result};
use crate::handlers::{handle_request, GatewayState};
use crate::session::{ClientConnection, ConnectionId, ReplySink};

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server name, used in logs
    pub name: String,
    /// Controller host
    pub controller_address: String,
    /// Controller TCP port
    pub controller_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "ctlgate".to_string(),
            controller_address: "localhost".to_string(),
            controller_port: DEFAULT_CONTROLLER_PORT,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.controller_address.trim().is_empty() {
            return Err(GatewayError::Config("controller address is empty".to_string()));
        }
        if self.controller_port == 0 {
            return Err(GatewayError::Config("controller port must not be 0".to_string()));
        }
        Ok(())
    }
}

pub(crate) struct GatewayInner {
    pub(crate) config: GatewayConfig,
    registry: RequestRegistry,
    state: Mutex<GatewayState>,
    /// Running flag
    pub(crate) running: RwLock<bool>,
    /// Wakes the accept loop on stop
    pub(crate) shutdown: Notify,
}

impl GatewayInner {
    fn handle_fatal(&self, generation: u64, error: DriverError) {
        let mut state = self.state.lock();
        if !state.controller.is_connected() || state.controller.generation() != generation {
            debug!("Ignoring disconnect from stale controller link {}", generation);
            return;
        }

        error!("Lost connection to the controller: {}", error);
        state.controller.discard();

        let reply = GatewayError::FatalDisconnect(error).to_reply();
        for connection in state.connections.values() {
            connection.reply(reply.clone());
        }
        info!("Notified {} connections of the controller loss", state.connections.len());
    }
}

/// Shared-controller gateway. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, connector: Arc<dyn DriverConnector>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<GatewayInner>| {
            let weak = weak.clone();
            let notifier: FatalNotifier = Arc::new(move |generation, error| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_fatal(generation, error);
                }
            });

            let controller = ControllerSession::new(
                connector,
                config.controller_address.clone(),
                config.controller_port,
                notifier,
            );

            GatewayInner {
                config,
                registry: RequestRegistry::standard(),
                state: Mutex::new(GatewayState {
                    connections: HashMap::new(),
                    controller,
                }),
                running: RwLock::new(false),
                shutdown: Notify::new(),
            }
        });

        Self { inner }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Names of the requests this gateway understands
    pub fn request_names(&self) -> Vec<&'static str> {
        self.inner.registry.names()
    }

    /// Register a connection, or point an existing one at a new sink.
    ///
    /// Without an id a fresh UUID is assigned.
    pub fn connect(&self, id: Option<&str>, sink: Arc<dyn ReplySink>) -> ConnectionId {
        let mut state = self.inner.state.lock();

        if let Some(id) = id {
            if let Some(existing) = state.connections.get_mut(id) {
                debug!("Reusing connection {}", id);
                existing.rebind(sink);
                return id.to_string();
            }
        }

        let connection = ClientConnection::new(id, sink);
        let id = connection.id.clone();
        state.connections.insert(id.clone(), connection);
        info!("Connection {} created ({} live)", id, state.connections.len());
        id
    }

    /// Remove a connection. Removing the last one shuts the controller
    /// session down. Unknown ids are ignored.
    pub fn disconnect(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(connection) = state.connections.remove(id) else {
            debug!("Disconnect for unknown connection {}", id);
            return false;
        };

        info!(
            "Connection {} removed after {:?} ({} live)",
            id,
            connection.age(),
            state.connections.len()
        );
        if state.connections.is_empty() {
            state.controller.teardown();
        }
        true
    }

    /// Handle a decoded request. Returns the direct reply, if any; other
    /// replies go through the connection's sink.
    pub fn handle(&self, id: &str, request: &Request) -> Option<Reply> {
        let mut state = self.inner.state.lock();
        debug!("Connection {} sent {}", id, request.name());

        match handle_request(&mut state, id, request) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Request {} from {} failed: {}", request.name(), id, e);
                Some(e.to_reply())
            }
        }
    }

    /// Decode and handle a JSON request
    pub fn handle_json(&self, id: &str, value: Value) -> Option<Reply> {
        match self.inner.registry.parse(value) {
            Ok(request) => self.handle(id, &request),
            Err(e) => {
                warn!("Undecodable request from {}: {}", id, e);
                Some(GatewayError::from(e).to_reply())
            }
        }
    }

    /// Decode and handle a request given as JSON text
    pub fn handle_text(&self, id: &str, text: &str) -> Option<Reply> {
        match self.inner.registry.parse_str(text) {
            Ok(request) => self.handle(id, &request),
            Err(e) => {
                warn!("Undecodable request from {}: {}", id, e);
                Some(GatewayError::from(e).to_reply())
            }
        }
    }

    pub fn controller_state(&self) -> ControllerState {
        self.inner.state.lock().controller.state()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Live connection ids, sorted
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.state.lock().connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Union of everything pushed to the controller
    pub fn effective_configuration(&self) -> PinConfiguration {
        *self.inner.state.lock().controller.effective()
    }

    /// Pins claimed by one connection
    pub fn connection_configuration(&self, id: &str) -> Option<PinConfiguration> {
        self.inner
            .state
            .lock()
            .connections
            .get(id)
            .map(|connection| *connection.configuration())
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
