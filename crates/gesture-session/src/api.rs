//! Local control API.
//!
//! Lets a UI (or a script) drive the session over HTTP and watch it over a
//! WebSocket.
//!
//! # Endpoints
//!
//! - `GET /api/session` - Current session snapshot
//! - `POST /api/collect/:label` - Start collecting a class
//! - `POST /api/collect/stop` - Stop collecting
//! - `POST /api/train` - Train the family, or one class with `{"label": ".."}`
//! - `POST /api/predict/toggle` - Turn live prediction on or off
//! - `POST /api/reset` - Ask to delete every sample and model of the family
//! - `POST /api/reset/:label` - Ask to delete the samples and model of a class
//! - `DELETE /api/data/:label` - Ask to delete the samples of a class
//! - `POST /api/confirm` - Run the pending destructive action
//! - `POST /api/cancel` - Discard the pending destructive action
//! - `GET /ws` - Session event stream
//!
//! Commands the session refuses (for example collecting while training) are
//! not errors: the response is the unchanged snapshot whose status message
//! explains why.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use gesture_backend::TrainingService;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::confirm::PendingDestructiveAction;
use crate::coordinator::Coordinator;
use crate::error::CaptureError;
use crate::session::SessionSnapshot;
use crate::websocket::ws_handler;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/train`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainRequest {
    /// Class to train; the whole family when absent.
    #[serde(default)]
    pub label: Option<String>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable reason.
    pub error: String,
}

// ============================================================================
// API Error Type
// ============================================================================

#[derive(Debug)]
struct ApiError(CaptureError);

impl From<CaptureError> for ApiError {
    fn from(error: CaptureError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            CaptureError::UnknownLabel { .. } => StatusCode::NOT_FOUND,
            CaptureError::NothingToConfirm => StatusCode::CONFLICT,
            ref other => {
                warn!(error = %other, "Control request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the control router around `coordinator`, with CORS for local
/// development and request tracing.
pub fn create_router<B: TrainingService>(coordinator: Coordinator<B>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/session", get(handle_session::<B>))
        .route("/collect/stop", post(handle_stop_collecting::<B>))
        .route("/collect/:label", post(handle_start_collecting::<B>))
        .route("/train", post(handle_train::<B>))
        .route("/predict/toggle", post(handle_toggle_prediction::<B>))
        .route("/reset", post(handle_reset::<B>))
        .route("/reset/:label", post(handle_class_reset::<B>))
        .route("/data/:label", delete(handle_delete_data::<B>))
        .route("/confirm", post(handle_confirm::<B>))
        .route("/cancel", post(handle_cancel::<B>));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler::<B>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(coordinator)
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_session<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
) -> Json<SessionSnapshot> {
    Json(coordinator.snapshot().await)
}

async fn handle_start_collecting<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
    Path(label): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(coordinator.start_collecting(&label).await?))
}

async fn handle_stop_collecting<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
) -> Json<SessionSnapshot> {
    Json(coordinator.stop_collecting().await)
}

/// An empty or missing body trains the whole family.
async fn handle_train<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
    body: Option<Json<TrainRequest>>,
) -> ApiResult<Json<SessionSnapshot>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(coordinator.train(request.label.as_deref()).await?))
}

async fn handle_toggle_prediction<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
) -> Json<SessionSnapshot> {
    Json(coordinator.toggle_prediction().await)
}

async fn handle_reset<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
) -> (StatusCode, Json<PendingDestructiveAction>) {
    (StatusCode::ACCEPTED, Json(coordinator.request_reset().await))
}

async fn handle_class_reset<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
    Path(label): Path<String>,
) -> ApiResult<(StatusCode, Json<PendingDestructiveAction>)> {
    let pending = coordinator.request_class_reset(&label).await?;
    Ok((StatusCode::ACCEPTED, Json(pending)))
}

async fn handle_delete_data<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
    Path(label): Path<String>,
) -> ApiResult<(StatusCode, Json<PendingDestructiveAction>)> {
    let pending = coordinator.request_delete(&label).await?;
    Ok((StatusCode::ACCEPTED, Json(pending)))
}

async fn handle_confirm<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(coordinator.confirm().await?))
}

async fn handle_cancel<B: TrainingService>(
    State(coordinator): State<Coordinator<B>>,
) -> ApiResult<Json<PendingDestructiveAction>> {
    Ok(Json(coordinator.cancel().await?))
}
