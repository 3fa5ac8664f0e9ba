//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures::{SinkExt, StreamExt};
use roomcast::api::{self, AppState};
use roomcast::config::{HubConfig, RelayConfig};
use roomcast::hub::Hub;
use roomcast::relay::RoomRelay;
use roomcast::router::MessageRouter;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn quiet_relay() -> RelayConfig {
    RelayConfig {
        assistant_replies: false,
        ..RelayConfig::default()
    }
}

pub fn test_state(relay: RelayConfig) -> AppState {
    let hub = Hub::start(HubConfig::default());
    let router: Arc<dyn MessageRouter> = Arc::new(RoomRelay::new(hub.clone(), relay));
    AppState::new(hub, router)
}

/// Router over a fresh hub, for `oneshot` requests.
pub async fn test_app() -> (Router, Hub) {
    let state = test_state(quiet_relay());
    let hub = state.hub.clone();
    (api::create_router(state), hub)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Hub,
    task: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    pub async fn connect(&self, user: &str, room: &str) -> WsClient {
        let (client, _) = connect_async(self.url(&format!("user_id={user}&room_id={room}")))
            .await
            .unwrap();
        client
    }

    /// Wait until the hub reports `count` registered connections.
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.hub.stats().total_connections != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {count} connections, have {}",
                self.hub.stats().total_connections
            )
        });
    }

    pub async fn stop(self) {
        self.hub.shutdown().await;
        self.task.abort();
    }
}

/// Serve the full app on an ephemeral local port.
pub async fn spawn_server(relay: RelayConfig) -> TestServer {
    let state = test_state(relay);
    let hub = state.hub.clone();
    let app = api::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, hub, task }
}

pub async fn send_json(client: &mut WsClient, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON text frame, skipping transport control frames.
pub async fn next_json(client: &mut WsClient) -> Value {
    try_next_json(client, RECV_TIMEOUT)
        .await
        .expect("no event received in time")
}

pub async fn try_next_json(client: &mut WsClient, wait: Duration) -> Option<Value> {
    tokio::time::timeout(wait, async {
        while let Some(message) = client.next().await {
            match message.ok()? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
