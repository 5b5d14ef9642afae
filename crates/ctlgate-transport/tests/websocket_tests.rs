//! WebSocket transport tests

use ctlgate_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    WebSocketServer, WebSocketTransport,
};
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn next_message<R: TransportReceiver>(receiver: &mut R) -> Option<String> {
    loop {
        match timeout(WAIT, receiver.recv()).await.ok()?? {
            TransportEvent::Message(text) => return Some(text),
            TransportEvent::Connected => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_text_round_trip() {
    let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (sender, mut receiver, _) = server.accept().await.unwrap();
        let text = next_message(&mut receiver).await.unwrap();
        sender.send(format!("echo:{}", text)).await.unwrap();
        // keep the connection open until the client has read the reply
        next_message(&mut receiver).await
    });

    let url = format!("ws://{}/control", addr);
    let (sender, mut receiver) = WebSocketTransport::connect(&url).await.unwrap();
    assert!(sender.is_connected());

    sender.send(r#"{"request":"status"}"#.to_string()).await.unwrap();
    let reply = next_message(&mut receiver).await.unwrap();
    assert_eq!(reply, r#"echo:{"request":"status"}"#);

    sender.close().await.unwrap();
    assert!(!sender.is_connected());
    let _ = timeout(WAIT, accept).await;
}

#[tokio::test]
async fn test_disconnect_event_on_close() {
    let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (_sender, mut receiver, _) = server.accept().await.unwrap();
        loop {
            match timeout(WAIT, receiver.recv()).await {
                Ok(Some(TransportEvent::Disconnected { .. })) | Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    });

    let url = format!("ws://{}/control", addr);
    let (sender, _receiver) = WebSocketTransport::connect(&url).await.unwrap();
    sender.close().await.unwrap();

    assert!(timeout(WAIT, accept).await.unwrap().unwrap());
}

#[tokio::test]
async fn test_other_paths_rejected() {
    let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept = tokio::spawn(async move { server.accept().await.is_err() });

    let url = format!("ws://{}/elsewhere", addr);
    assert!(WebSocketTransport::connect(&url).await.is_err());
    assert!(timeout(WAIT, accept).await.unwrap().unwrap());
}
