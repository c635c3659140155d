//! Integration tests for the control API.
//!
//! These tests drive a running control server with HTTP requests and watch
//! it over a real WebSocket connection.

mod common;

use std::time::Duration;

use common::{wait_until, FakeService, FakeState};
use futures::{SinkExt, StreamExt};
use gesture_backend::HttpTrainingService;
use gesture_session::{create_router, Config, Coordinator, SessionMode};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const SAMPLES: u32 = 5;

struct Harness {
    service: FakeService,
    coordinator: Coordinator<HttpTrainingService>,
    origin: String,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl Harness {
    async fn spawn() -> Self {
        let service = FakeService::spawn_with(FakeState {
            max: SAMPLES,
            ..FakeState::default()
        })
        .await;
        let config = Config {
            samples_per_class: SAMPLES,
            ..service.config()
        };
        let client = HttpTrainingService::new(&config.backend_url, config.request_timeout())
            .expect("Failed to build client");
        let coordinator = Coordinator::new(client, &config);
        let (origin, server) = common::serve(create_router(coordinator.clone())).await;
        Self {
            service,
            coordinator,
            origin,
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.origin)
    }

    async fn post(&self, path: &str) -> (u16, Value) {
        let response = reqwest::Client::new()
            .post(self.url(path))
            .send()
            .await
            .expect("Request failed");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Body is not JSON"))
    }

    async fn connect(&self) -> WsStream {
        let url = format!("{}/ws", self.origin.replacen("http", "ws", 1));
        let (ws_stream, _) = connect_async(&url).await.expect("Failed to connect");
        ws_stream
    }
}

/// Receives the next event other than overlays, answering pings on the way.
async fn receive_event(ws: &mut WsStream, timeout: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next()).await.ok()??;
        match msg {
            Ok(Message::Text(text)) => {
                let event: Value = serde_json::from_str(&text).ok()?;
                if event["event"] != "overlay" {
                    return Some(event);
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Receives events until one named `name` arrives.
async fn receive_named(ws: &mut WsStream, name: &str) -> Value {
    loop {
        let event = receive_event(ws, Duration::from_secs(5))
            .await
            .unwrap_or_else(|| panic!("no '{name}' event arrived"));
        if event["event"] == name {
            return event;
        }
    }
}

#[tokio::test]
async fn test_session_endpoint() {
    let harness = Harness::spawn().await;

    let body: Value = reqwest::get(harness.url("/api/session"))
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Body is not JSON");

    assert_eq!(body["family"], "vocales");
    assert_eq!(body["mode"], "idle");
    assert_eq!(body["progress"].as_array().unwrap().len(), 5);
    assert_eq!(body["total"]["max"], 25);
    assert!(body["pendingConfirmation"].is_null());
}

#[tokio::test]
async fn test_collect_start_and_stop() {
    let harness = Harness::spawn().await;

    let (status, body) = harness.post("/api/collect/a").await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "collecting");
    assert_eq!(body["activeLabel"], "a");

    let (status, body) = harness.post("/api/collect/stop").await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "idle");
}

#[tokio::test]
async fn test_unknown_label_is_not_found() {
    let harness = Harness::spawn().await;

    let (status, body) = harness.post("/api/collect/z").await;
    assert_eq!(status, 404);
    assert!(body["error"].as_str().unwrap().contains('z'));
}

#[tokio::test]
async fn test_train_one_class_over_http() {
    let harness = Harness::spawn().await;
    harness.service.set_count("i", SAMPLES);
    harness.coordinator.reconcile().await.unwrap();

    let response = reqwest::Client::new()
        .post(harness.url("/api/train"))
        .json(&json!({ "label": "i" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["training"], true);

    let trained = wait_until(&harness.coordinator, Duration::from_secs(5), |s| {
        s.model_trained && !s.training
    })
    .await;
    assert!(trained);
    assert_eq!(harness.service.requests_matching("POST vocales/entrenar/i"), 1);
}

#[tokio::test]
async fn test_websocket_connect_sends_snapshot() {
    let harness = Harness::spawn().await;
    let mut ws = harness.connect().await;

    let event = receive_event(&mut ws, Duration::from_secs(5))
        .await
        .expect("Should receive connected event");
    assert_eq!(event["event"], "connected");
    assert_eq!(event["payload"]["session"]["family"], "vocales");
    assert_eq!(event["payload"]["session"]["mode"], "idle");
}

#[tokio::test]
async fn test_websocket_sees_session_changes() {
    let harness = Harness::spawn().await;
    let mut ws = harness.connect().await;
    receive_named(&mut ws, "connected").await;

    harness.post("/api/collect/o").await;
    let event = receive_named(&mut ws, "session").await;
    assert_eq!(event["payload"]["session"]["mode"], "collecting");
    assert_eq!(event["payload"]["session"]["activeLabel"], "o");
}

#[tokio::test]
async fn test_reset_requires_confirmation() {
    let harness = Harness::spawn().await;
    harness.service.set_count("a", 3);
    harness.coordinator.reconcile().await.unwrap();
    let mut ws = harness.connect().await;
    receive_named(&mut ws, "connected").await;

    let (status, pending) = harness.post("/api/reset/a").await;
    assert_eq!(status, 202);
    assert_eq!(pending["action"]["kind"], "reset_class");
    assert_eq!(pending["action"]["label"], "a");
    assert!(!pending["message"].as_str().unwrap().is_empty());

    let requested = receive_named(&mut ws, "confirmation_requested").await;
    assert_eq!(requested["payload"]["action"]["label"], "a");

    // Nothing is deleted before the confirmation
    assert_eq!(harness.service.requests_matching("DELETE"), 0);
    let session: Value = reqwest::get(harness.url("/api/session"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["pendingConfirmation"]["action"]["kind"], "reset_class");

    let (status, _) = harness.post("/api/confirm").await;
    assert_eq!(status, 200);
    let resolved = receive_named(&mut ws, "confirmation_resolved").await;
    assert_eq!(resolved["payload"]["confirmed"], true);

    let cleared = wait_until(&harness.coordinator, Duration::from_secs(5), |s| {
        s.class("a").is_some_and(|a| a.count == 0)
    })
    .await;
    assert!(cleared);
    harness.coordinator.quiesce().await;
    assert_eq!(harness.service.count("a"), 0);
    assert_eq!(harness.service.requests_matching("DELETE vocales/datos/a"), 1);
    assert_eq!(harness.service.requests_matching("DELETE vocales/modelo/a"), 1);
}

#[tokio::test]
async fn test_cancel_discards_the_pending_action() {
    let harness = Harness::spawn().await;

    let (status, _) = harness.post("/api/reset").await;
    assert_eq!(status, 202);

    let (status, pending) = harness.post("/api/cancel").await;
    assert_eq!(status, 200);
    assert_eq!(pending["action"]["kind"], "reset_family");

    let (status, body) = harness.post("/api/confirm").await;
    assert_eq!(status, 409);
    assert!(body["error"].is_string());
    assert_eq!(harness.service.requests_matching("DELETE"), 0);
    assert_eq!(harness.coordinator.snapshot().await.mode, SessionMode::Idle);
}

#[tokio::test]
async fn test_delete_data_keeps_the_route_shape() {
    let harness = Harness::spawn().await;

    let response = reqwest::Client::new()
        .delete(harness.url("/api/data/u"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 202);
    let pending: Value = response.json().await.unwrap();
    assert_eq!(pending["action"]["kind"], "delete_class_data");
    assert_eq!(pending["action"]["label"], "u");
}

#[tokio::test]
async fn test_multiple_websocket_clients() {
    let harness = Harness::spawn().await;
    let mut first = harness.connect().await;
    let mut second = harness.connect().await;
    receive_named(&mut first, "connected").await;
    receive_named(&mut second, "connected").await;

    harness.post("/api/collect/e").await;

    for ws in [&mut first, &mut second] {
        let event = receive_named(ws, "session").await;
        assert_eq!(event["payload"]["session"]["activeLabel"], "e");
    }
}
