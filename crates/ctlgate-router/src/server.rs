//! Transport front end
//!
//! The gateway is transport-agnostic: it accepts connections from any
//! [`TransportServer`]. Each transport connection becomes one client
//! connection with a fresh id, and is removed again when the transport
//! closes.

use ctlgate_core::Reply;
use ctlgate_transport::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[cfg(feature = "websocket")]
use ctlgate_transport::WebSocketServer;

use crate::error::Result;
use crate::gateway::Gateway;

impl Gateway {
    /// Serve using any TransportServer implementation.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        info!("{} accepting connections", self.inner.config.name);
        *self.inner.running.write() = true;

        loop {
            // Register for the wakeup before checking the flag so a stop in
            // between is not missed
            let shutdown = self.inner.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();
            if !self.is_running() {
                break;
            }

            tokio::select! {
                _ = &mut shutdown => break,
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        info!("New connection from {}", addr);
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
            }
        }

        info!("{} stopped accepting connections", self.inner.config.name);

        server.close().await?;
        Ok(())
    }

    /// Serve the control channel over WebSocket
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        let server = WebSocketServer::bind(addr).await?;
        self.serve_on(server).await
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.read()
    }

    /// Stop accepting connections and stop reading from open ones
    pub fn stop(&self) {
        *self.inner.running.write() = false;
        self.inner.shutdown.notify_waiters();
    }

    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let gateway = self.clone();

        tokio::spawn(async move {
            // Direct replies and sink replies share one queue so they reach
            // the client in the order they were produced
            let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();
            let id = gateway.connect(None, Arc::new(reply_tx.clone()));
            debug!("Connection {} bound to {}", id, addr);

            let writer = tokio::spawn(async move {
                while let Some(reply) = reply_rx.recv().await {
                    let text = match reply.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode reply: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(text).await {
                        error!("Send error: {}", e);
                        break;
                    }
                }
            });

            while gateway.is_running() {
                match receiver.recv().await {
                    Some(TransportEvent::Message(text)) => {
                        if let Some(reply) = gateway.handle_text(&id, &text) {
                            let _ = reply_tx.send(reply);
                        }
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!("Transport error from {}: {}", addr, e);
                        let _ = reply_tx.send(Reply::error(e));
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        info!("Client {} disconnected: {:?}", addr, reason);
                        break;
                    }
                    Some(TransportEvent::Connected) => {}
                    None => break,
                }
            }

            // Dropping the last sender lets the writer drain and finish
            gateway.disconnect(&id);
            drop(reply_tx);
            let _ = writer.await;
        });
    }
}
