//! WebSocket event types and broadcasting for live session observation.
//!
//! Every observable change of the session is broadcast to connected clients.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes the current session
//! - `session` - The session changed (mode, progress, status message, ...)
//! - `overlay` - Skeleton overlay of the latest processed video frame
//! - `prediction` - A new prediction was accepted
//! - `confirmation_requested` - A destructive action awaits confirmation
//! - `confirmation_resolved` - The pending action was confirmed or cancelled
//! - `error` - The landmark pipeline failed
//!
//! # Example
//!
//! ```no_run
//! use gesture_session::websocket::{EventBroadcaster, SessionEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(SessionEvent::error("camera unplugged"));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {}", event.event_name());
//! }
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use gesture_backend::TrainingService;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::confirm::{DestructiveAction, PendingDestructiveAction};
use crate::coordinator::Coordinator;
use crate::overlay::Overlay;
use crate::session::SessionSnapshot;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` and `session` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Session state at the time of the event.
    pub session: SessionSnapshot,
}

/// Payload for the `prediction` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionPayload {
    /// Predicted class.
    pub label: String,
    /// Confidence of `label`, 0 to 1.
    pub confidence: f64,
    /// Probability of every class.
    pub all_probabilities: BTreeMap<String, f64>,
    /// When the prediction was applied.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `confirmation_resolved` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResolvedPayload {
    /// The resolved action.
    pub action: DestructiveAction,
    /// `false` when the operator cancelled.
    pub confirmed: bool,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events streamed to observers.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Sent once to each new WebSocket client.
    Connected(SessionPayload),
    /// The session changed.
    Session(SessionPayload),
    /// Drawing instructions for the latest frame.
    Overlay(Overlay),
    /// A new or changed prediction.
    Prediction(PredictionPayload),
    /// A destructive action awaits confirmation.
    ConfirmationRequested(PendingDestructiveAction),
    /// A pending action was confirmed or cancelled.
    ConfirmationResolved(ConfirmationResolvedPayload),
    /// A failure worth showing to the operator.
    Error(ErrorPayload),
}

impl SessionEvent {
    /// Builds a `connected` event.
    #[must_use]
    pub const fn connected(session: SessionSnapshot) -> Self {
        Self::Connected(SessionPayload { session })
    }

    /// Builds a `session` event.
    #[must_use]
    pub const fn session(session: SessionSnapshot) -> Self {
        Self::Session(SessionPayload { session })
    }

    /// Builds a `prediction` event from a snapshot holding a prediction.
    #[must_use]
    pub fn prediction(session: &SessionSnapshot) -> Option<Self> {
        let label = session.prediction.clone()?;
        Some(Self::Prediction(PredictionPayload {
            label,
            confidence: session.confidence.unwrap_or_default(),
            all_probabilities: session.all_probabilities.clone(),
            timestamp: session.updated_at,
        }))
    }

    /// Builds a `confirmation_resolved` event.
    #[must_use]
    pub const fn confirmation_resolved(action: DestructiveAction, confirmed: bool) -> Self {
        Self::ConfirmationResolved(ConfirmationResolvedPayload { action, confirmed })
    }

    /// Builds an `error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Session(_) => "session",
            Self::Overlay(_) => "overlay",
            Self::Prediction(_) => "prediction",
            Self::ConfirmationRequested(_) => "confirmation_requested",
            Self::ConfirmationResolved(_) => "confirmation_resolved",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans session events out to every subscriber.
///
/// Events are not kept for clients that connect later; a slow subscriber
/// receives `Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts `event`, returning how many subscribers will see it.
    pub fn send(&self, event: SessionEvent) -> usize {
        // no receivers is not an error here
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Heartbeat ping period.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Upgrades `/ws` requests and streams session events to the client.
pub async fn ws_handler<B: TrainingService>(
    ws: WebSocketUpgrade,
    State(coordinator): State<Coordinator<B>>,
) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator))
}

/// Sends `connected` with the current session, then forwards broadcast
/// events until the client goes away or misses too many pongs.
async fn handle_socket<B: TrainingService>(socket: WebSocket, coordinator: Coordinator<B>) {
    let (mut sender, mut receiver) = socket.split();

    // subscribe first so nothing between the snapshot and the stream is lost
    let mut events = coordinator.subscribe();
    let connected = SessionEvent::connected(coordinator.snapshot().await);
    let connected_json = match serde_json::to_string(&connected) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize connected event");
            return;
        }
    };
    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }
    info!("WebSocket client connected, sent current session");

    let mut heartbeat = interval(HEARTBEAT);
    // the first tick completes immediately
    heartbeat.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring data message from client");
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(
                                    error = %e,
                                    event = event.event_name(),
                                    "Failed to serialize event"
                                );
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Client lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(
                        missed = MAX_MISSED_PONGS,
                        "Client stopped answering pings, closing connection"
                    );
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gesture_backend::{ClassFamily, FamilyId};

    use super::*;
    use crate::landmarks::tests::sample_frame;
    use crate::session::{CaptureSession, SessionSettings};

    fn snapshot() -> SessionSnapshot {
        CaptureSession::new(ClassFamily::new(FamilyId::Numbers), SessionSettings::default())
            .snapshot()
    }

    #[test]
    fn test_connected_event_serialization() {
        let json = serde_json::to_string(&SessionEvent::connected(snapshot())).unwrap();
        assert!(json.contains(r#""event":"connected""#));
        assert!(json.contains(r#""session""#));
        assert!(json.contains(r#""family":"numeros""#));
        assert!(json.contains(r#""statusMessage""#));
    }

    #[test]
    fn test_overlay_event_serialization() {
        let overlay = Overlay::render(640, 480, &[sample_frame()]);
        let json = serde_json::to_string(&SessionEvent::Overlay(overlay)).unwrap();
        assert!(json.contains(r#""event":"overlay""#));
        assert!(json.contains(r#""segmentColor":"lime""#));
    }

    #[test]
    fn test_confirmation_events_serialization() {
        let pending = PendingDestructiveAction {
            message: "Delete?".to_string(),
            action: DestructiveAction::DeleteClassData(gesture_backend::ClassLabel::new("7")),
            requested_at: Utc::now(),
        };
        let json = serde_json::to_string(&SessionEvent::ConfirmationRequested(pending)).unwrap();
        assert!(json.contains(r#""event":"confirmation_requested""#));
        assert!(json.contains(r#""kind":"delete_class_data""#));

        let json = serde_json::to_string(&SessionEvent::confirmation_resolved(
            DestructiveAction::ResetFamily,
            false,
        ))
        .unwrap();
        assert!(json.contains(r#""event":"confirmation_resolved""#));
        assert!(json.contains(r#""confirmed":false"#));
    }

    #[test]
    fn test_prediction_event_requires_a_prediction() {
        let mut session = snapshot();
        assert!(SessionEvent::prediction(&session).is_none());

        session.prediction = Some("3".to_string());
        session.confidence = Some(0.8);
        let event = SessionEvent::prediction(&session).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"prediction""#));
        assert!(json.contains(r#""label":"3""#));
        assert!(json.contains(r#""confidence":0.8"#));
    }

    #[test]
    fn test_error_event_round_trip() {
        let json = r#"{"event":"error","payload":{"message":"camera unplugged"}}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_name(), "error");
        let SessionEvent::Error(payload) = event else {
            unreachable!()
        };
        assert_eq!(payload.message, "camera unplugged");
    }

    #[tokio::test]
    async fn test_broadcaster_multiple_subscribers() {
        let broadcaster = EventBroadcaster::new(10);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        assert_eq!(broadcaster.send(SessionEvent::error("boom")), 2);
        assert_eq!(first.recv().await.unwrap().event_name(), "error");
        assert_eq!(second.recv().await.unwrap().event_name(), "error");
    }

    #[test]
    fn test_broadcaster_no_subscribers() {
        let broadcaster = EventBroadcaster::default();
        assert_eq!(broadcaster.receiver_count(), 0);
        assert_eq!(broadcaster.send(SessionEvent::error("nobody listening")), 0);
    }
}
