//! Common test helpers for ctlgate tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - Reply collectors usable as connection reply sinks
//! - A test gateway served over WebSocket on a simulated controller, with RAII cleanup
//! - A minimal WebSocket client speaking the JSON control protocol

use ctlgate_core::{Reply, CONTROL_PATH};
use ctlgate_router::{Gateway, GatewayConfig, ReplySink, SimulatedConnector};
use ctlgate_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketReceiver,
    WebSocketSender, WebSocketTransport,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Reply Collector
// ============================================================================

/// Reply sink that keeps every reply it is handed
#[derive(Clone, Default)]
pub struct ReplyCollector {
    replies: Arc<Mutex<Vec<Reply>>>,
    notify: Arc<Notify>,
    count: Arc<AtomicU32>,
}

impl ReplyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// This collector as a sink for [`Gateway::connect`]
    pub fn sink(&self) -> Arc<dyn ReplySink> {
        Arc::new(self.clone())
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n replies
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().clone()
    }

    /// Only the error replies
    pub fn errors(&self) -> Vec<Reply> {
        self.replies
            .lock()
            .iter()
            .filter(|reply| reply.is_error())
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<Reply> {
        self.replies.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.replies.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl ReplySink for ReplyCollector {
    fn deliver(&self, reply: Reply) {
        self.replies.lock().push(reply);
        self.count.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

// ============================================================================
// Test Gateway - RAII wrapper with proper cleanup
// ============================================================================

/// A gateway on a simulated controller, served over WebSocket until dropped
pub struct TestGateway {
    port: u16,
    gateway: Gateway,
    controller: SimulatedConnector,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestGateway {
    /// Start a test gateway on a fresh simulated controller
    pub async fn start() -> Self {
        Self::start_with(SimulatedConnector::new()).await
    }

    /// Start a test gateway on the given simulated controller
    pub async fn start_with(controller: SimulatedConnector) -> Self {
        let port = find_available_port().await;
        let addr = format!("127.0.0.1:{}", port);

        let config = GatewayConfig {
            name: "Test Gateway".to_string(),
            ..Default::default()
        };
        let gateway = Gateway::new(config, Arc::new(controller.clone()));

        let server = gateway.clone();
        let handle = tokio::spawn(async move {
            let _ = server.serve_websocket(&addr).await;
        });

        // Wait until the port is listening
        let _ = wait_for(
            || async move {
                tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            Duration::from_secs(5),
        )
        .await;

        Self {
            port,
            gateway,
            controller,
            handle: Some(handle),
        }
    }

    /// WebSocket URL of the control channel
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}{}", self.port, CONTROL_PATH)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn controller(&self) -> &SimulatedConnector {
        &self.controller
    }

    /// Connect a client to the control channel
    pub async fn connect_client(&self) -> TestClient {
        TestClient::connect(&self.url()).await
    }

    /// Stop the gateway explicitly (also happens on drop)
    pub fn stop(&mut self) {
        self.gateway.stop();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// WebSocket client sending JSON requests and reading JSON replies
pub struct TestClient {
    sender: WebSocketSender,
    receiver: WebSocketReceiver,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        let (sender, receiver) = WebSocketTransport::connect(url).await.unwrap();
        Self { sender, receiver }
    }

    /// Send one request
    pub async fn send(&self, request: Value) {
        self.sender.send(request.to_string()).await.unwrap();
    }

    /// Send raw text
    pub async fn send_text(&self, text: &str) {
        self.sender.send(text.to_string()).await.unwrap();
    }

    /// Next reply, or None on timeout or close
    pub async fn recv_reply(&mut self, max_wait: Duration) -> Option<Reply> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.receiver.recv()).await.ok()?? {
                TransportEvent::Message(text) => return Reply::from_json(&text).ok(),
                TransportEvent::Connected => continue,
                TransportEvent::Disconnected { .. } | TransportEvent::Error(_) => return None,
            }
        }
    }

    /// Send a request and wait for its reply
    pub async fn request(&mut self, request: Value) -> Option<Reply> {
        self.send(request).await;
        self.recv_reply(DEFAULT_TIMEOUT).await
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}
