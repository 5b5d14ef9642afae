//! Client connections

use ctlgate_core::{PinConfiguration, Reply};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Connection identifier
pub type ConnectionId = String;

/// Where replies outside the request/response flow are delivered
pub trait ReplySink: Send + Sync {
    /// Deliver a reply. Must not block.
    fn deliver(&self, reply: Reply);
}

impl ReplySink for mpsc::UnboundedSender<Reply> {
    fn deliver(&self, reply: Reply) {
        // A closed channel means the transport is already gone
        let _ = self.send(reply);
    }
}

/// Sink that drops every reply
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardReplies;

impl ReplySink for DiscardReplies {
    fn deliver(&self, _reply: Reply) {}
}

/// One logical client and the pins it has claimed
pub struct ClientConnection {
    /// Unique connection ID
    pub id: ConnectionId,
    configuration: PinConfiguration,
    sink: Arc<dyn ReplySink>,
    created_at: Instant,
}

impl ClientConnection {
    pub fn new(id: Option<&str>, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            id: id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
            configuration: PinConfiguration::new(),
            sink,
            created_at: Instant::now(),
        }
    }

    /// How long this connection has been registered
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Pins this connection has claimed
    pub fn configuration(&self) -> &PinConfiguration {
        &self.configuration
    }

    pub(crate) fn set_configuration(&mut self, configuration: PinConfiguration) {
        self.configuration = configuration;
    }

    /// Point replies at a new sink, e.g. after the client reconnects
    pub fn rebind(&mut self, sink: Arc<dyn ReplySink>) {
        self.sink = sink;
    }

    /// Send a reply through this connection's sink
    pub fn reply(&self, reply: Reply) {
        self.sink.deliver(reply);
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("configuration", &self.configuration)
            .finish()
    }
}
