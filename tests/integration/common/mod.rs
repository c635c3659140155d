//! Shared fixtures: an in-process training service speaking the wire format
//! of the real one, plus helpers for recordings and servers.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use gesture_backend::TrainingService;
use gesture_session::{Config, Coordinator, SessionSnapshot};
use serde_json::{json, Value};

/// What the fake service has stored.
#[derive(Debug)]
pub struct FakeState {
    pub counts: BTreeMap<String, u32>,
    pub models: BTreeMap<String, bool>,
    pub max: u32,
    /// Answer statistics in the legacy shape.
    pub legacy_stats: bool,
    /// Every request as "METHOD path".
    pub requests: Vec<String>,
    pub predict_times: Vec<Instant>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
            models: BTreeMap::new(),
            max: 100,
            legacy_stats: false,
            requests: Vec::new(),
            predict_times: Vec::new(),
        }
    }
}

pub type Shared = Arc<Mutex<FakeState>>;

/// A running fake service.
pub struct FakeService {
    pub state: Shared,
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeService {
    pub async fn spawn() -> Self {
        Self::spawn_with(FakeState::default()).await
    }

    pub async fn spawn_with(state: FakeState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let (base, handle) = serve(router(Arc::clone(&state))).await;
        Self {
            state,
            base_url: format!("{base}/api"),
            handle,
        }
    }

    pub fn count(&self, label: &str) -> u32 {
        self.state.lock().unwrap().counts.get(label).copied().unwrap_or(0)
    }

    pub fn set_count(&self, label: &str, count: u32) {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert(label.to_string(), count);
    }

    pub fn requests_matching(&self, needle: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.contains(needle))
            .count()
    }

    /// Session configuration pointed at this service.
    pub fn config(&self) -> Config {
        Config {
            backend_url: self.base_url.clone(),
            request_timeout_secs: 5,
            ..Config::default()
        }
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: Shared) -> Router {
    let api = Router::new()
        .route("/salud", get(|| async { Json(json!({ "estado": "ok" })) }))
        .route("/:family/estadisticas", get(stats))
        .route("/:family/recolectar/:label", post(collect))
        .route("/:family/prediccion", post(predict_any))
        .route("/:family/prediccion/:label", post(predict_one))
        .route("/:family/entrenar", post(train_all))
        .route("/:family/entrenar/:label", post(train_one))
        .route("/:family/datos/:label", delete(delete_data))
        .route("/:family/modelo/:label", delete(delete_model));
    Router::new().nest("/api", api).with_state(state)
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn log(state: &Shared, request: String) {
    state.lock().unwrap().requests.push(request);
}

async fn stats(State(state): State<Shared>, Path(family): Path<String>) -> Json<Value> {
    log(&state, format!("GET {family}/estadisticas"));
    let state = state.lock().unwrap();
    let labels: Vec<String> = state
        .counts
        .keys()
        .chain(state.models.keys())
        .cloned()
        .collect();
    let mut classes = serde_json::Map::new();
    for label in labels {
        let count = state.counts.get(&label).copied().unwrap_or(0);
        let model = state.models.get(&label).copied().unwrap_or(false);
        let percentage = f64::from(count.min(state.max)) * 100.0 / f64::from(state.max);
        let entry = if state.legacy_stats {
            json!({ "cantidad": count, "max": state.max, "porcentaje": percentage })
        } else {
            json!({
                "total_muestras": count,
                "cantidad_recomendada": state.max,
                "progreso_porcentaje": percentage,
                "tiene_modelo": model,
            })
        };
        classes.insert(label, entry);
    }
    let key = if state.legacy_stats {
        family
    } else {
        format!("estadisticas_{family}")
    };
    Json(json!({ key: classes }))
}

async fn collect(
    State(state): State<Shared>,
    Path((family, label)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    log(&state, format!("POST {family}/recolectar/{label}"));
    let points = body
        .get("puntos_clave")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if points != 21 {
        return detail(
            StatusCode::UNPROCESSABLE_ENTITY,
            &format!("Se esperaban 21 puntos clave, se recibieron {points}"),
        );
    }
    let mut state = state.lock().unwrap();
    let max = state.max;
    let count = state.counts.entry(label).or_insert(0);
    if *count >= max {
        return Json(json!({
            "mensaje": "Límite alcanzado",
            "limite_alcanzado": true,
            "total_muestras": *count,
        }))
        .into_response();
    }
    *count += 1;
    Json(json!({ "mensaje": "Muestra guardada", "total_muestras": *count })).into_response()
}

fn predict(state: &Shared, family: &str, label: Option<&str>) -> Response {
    log(
        state,
        format!("POST {family}/prediccion/{}", label.unwrap_or("-")),
    );
    let mut state = state.lock().unwrap();
    state.predict_times.push(Instant::now());
    let trained: Vec<String> = state
        .models
        .iter()
        .filter(|(_, model)| **model)
        .map(|(label, _)| label.clone())
        .collect();
    let Some(best) = label
        .map(str::to_string)
        .filter(|l| trained.contains(l))
        .or_else(|| trained.first().cloned())
    else {
        return detail(
            StatusCode::BAD_REQUEST,
            "No hay modelo entrenado para esta familia",
        );
    };
    Json(json!({
        "prediccion": {
            "clase_predicha": best,
            "confianza": 0.91,
            "todas_las_probabilidades": { best.clone(): 0.91 },
        }
    }))
    .into_response()
}

async fn predict_any(State(state): State<Shared>, Path(family): Path<String>) -> Response {
    predict(&state, &family, None)
}

async fn predict_one(
    State(state): State<Shared>,
    Path((family, label)): Path<(String, String)>,
) -> Response {
    predict(&state, &family, Some(&label))
}

fn train(state: &Shared, family: &str, labels: Option<Vec<String>>) -> Response {
    log(
        state,
        format!(
            "POST {family}/entrenar/{}",
            labels.as_ref().map_or("-".to_string(), |l| l.join(","))
        ),
    );
    let mut state = state.lock().unwrap();
    let labels = labels.unwrap_or_else(|| state.counts.keys().cloned().collect());
    if labels.is_empty()
        || labels
            .iter()
            .any(|l| state.counts.get(l).copied().unwrap_or(0) < 2)
    {
        return detail(
            StatusCode::BAD_REQUEST,
            "Datos insuficientes para entrenar el modelo",
        );
    }
    for label in labels {
        state.models.insert(label, true);
    }
    Json(json!({
        "mensaje": "Modelo entrenado",
        "resultado": { "exito": true, "precision_validacion": 0.97, "epocas": 40 }
    }))
    .into_response()
}

async fn train_all(State(state): State<Shared>, Path(family): Path<String>) -> Response {
    train(&state, &family, None)
}

async fn train_one(
    State(state): State<Shared>,
    Path((family, label)): Path<(String, String)>,
) -> Response {
    train(&state, &family, Some(vec![label]))
}

async fn delete_data(
    State(state): State<Shared>,
    Path((family, label)): Path<(String, String)>,
) -> Response {
    log(&state, format!("DELETE {family}/datos/{label}"));
    state.lock().unwrap().counts.insert(label, 0);
    Json(json!({ "mensaje": "Datos eliminados" })).into_response()
}

async fn delete_model(
    State(state): State<Shared>,
    Path((family, label)): Path<(String, String)>,
) -> Response {
    log(&state, format!("DELETE {family}/modelo/{label}"));
    match state.lock().unwrap().models.remove(&label) {
        Some(_) => Json(json!({ "mensaje": "Modelo eliminado" })).into_response(),
        None => detail(StatusCode::NOT_FOUND, "No existe un modelo para esta clase"),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Helper to find an available port for testing.
pub fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Serves `router` on an ephemeral port and returns its `http://` origin.
pub async fn serve(router: Router) -> (String, tokio::task::JoinHandle<()>) {
    let addr = format!("127.0.0.1:{}", find_available_port());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{addr}"), handle)
}

/// One recorded hand: 21 points spread over the unit square.
pub fn hand() -> Vec<[f32; 3]> {
    (0..21u8)
        .map(|i| [f32::from(i) / 21.0, f32::from(i) / 42.0, 0.0])
        .collect()
}

/// Writes a recording of `frames` detections of one hand each.
pub fn write_recording(name: &str, frames: usize) -> PathBuf {
    let path = std::env::temp_dir().join(name);
    let mut file = std::fs::File::create(&path).expect("Failed to create recording");
    let line = json!({ "width": 640, "height": 480, "hands": [hand()] }).to_string();
    writeln!(file, r#"{{"ready": true}}"#).expect("Failed to write recording");
    for _ in 0..frames {
        writeln!(file, "{line}").expect("Failed to write recording");
    }
    path
}

/// Polls the session until `check` holds or `limit` elapses.
pub async fn wait_until<B, F>(coordinator: &Coordinator<B>, limit: Duration, check: F) -> bool
where
    B: TrainingService,
    F: Fn(&SessionSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check(&coordinator.snapshot().await) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
