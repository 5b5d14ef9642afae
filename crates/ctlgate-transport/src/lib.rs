//! ctlgate Transport Layer
//!
//! Transports carry JSON request and reply text between clients and the
//! gateway. The gateway only depends on the traits here; WebSocket is the
//! shipped implementation.

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};
