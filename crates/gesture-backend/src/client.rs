//! HTTP client for the training service.
//!
//! This module provides [`HttpTrainingService`], a [`TrainingService`] backed
//! by a shared reqwest [`Client`].

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    family::{ClassFamily, ClassLabel},
    service::TrainingService,
    stats::StatsSnapshot,
    wire::{CollectOutcome, ErrorBody, KeypointsRequest, Prediction, TrainOutcome},
    BackendError, Result,
};

/// Path of the health endpoint, relative to the base URL.
const HEALTH_PATH: &str = "salud";

/// Talks to the training service over HTTP.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use gesture_backend::HttpTrainingService;
///
/// # async fn example() -> gesture_backend::Result<()> {
/// let service = HttpTrainingService::new("http://localhost:8001/api", Duration::from_secs(10))?;
/// service.health_check().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTrainingService {
    client: Client,
    base_url: String,
}

impl HttpTrainingService {
    /// Creates a client for the service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the base URL requests are made against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Checks that the service answers its health endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is unreachable or unhealthy.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn health_check(&self) -> Result<()> {
        debug!("Probing training service");
        self.send(Method::GET, HEALTH_PATH, None).await?;
        info!("Training service is reachable");
        Ok(())
    }

    async fn send(&self, method: Method, path: &str, body: Option<&[[f32; 3]]>) -> Result<Value> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(keypoints) = body {
            request = request.json(&KeypointsRequest {
                puntos_clave: keypoints,
            });
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(rejection(status, &bytes));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::unexpected_payload(format!("{path}: {e}")))
    }

    /// Deletes a resource, treating "already gone" as success.
    async fn delete(&self, path: &str) -> Result<()> {
        match self.send(Method::DELETE, path, None).await {
            Ok(_) => Ok(()),
            Err(BackendError::Rejected { status: 404, .. }) => {
                debug!(path, "Nothing to delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn rejection(status: StatusCode, bytes: &[u8]) -> BackendError {
    let detail = serde_json::from_slice::<ErrorBody>(bytes)
        .map(ErrorBody::into_detail)
        .unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(bytes).trim().to_string();
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                text
            }
        });
    BackendError::rejected(status.as_u16(), detail)
}

impl TrainingService for HttpTrainingService {
    #[instrument(skip(self, family), fields(family = %family.id()))]
    async fn stats(&self, family: &ClassFamily) -> Result<StatsSnapshot> {
        let body = self.send(Method::GET, &family.stats_path(), None).await?;
        StatsSnapshot::from_response(family.id(), &body)
    }

    #[instrument(skip(self, family, keypoints), fields(family = %family.id(), label = %label))]
    async fn collect(
        &self,
        family: &ClassFamily,
        label: &ClassLabel,
        keypoints: &[[f32; 3]],
    ) -> Result<CollectOutcome> {
        let body = self
            .send(Method::POST, &family.collect_path(label), Some(keypoints))
            .await?;
        let outcome: CollectOutcome = serde_json::from_value(body).unwrap_or_default();
        if outcome.limit_reached {
            warn!("Service reports the class is already full");
        }
        Ok(outcome)
    }

    #[instrument(skip(self, family, keypoints), fields(family = %family.id()))]
    async fn predict(
        &self,
        family: &ClassFamily,
        label: Option<&ClassLabel>,
        keypoints: &[[f32; 3]],
    ) -> Result<Prediction> {
        let body = self
            .send(Method::POST, &family.predict_path(label), Some(keypoints))
            .await?;
        Prediction::from_response(body)
    }

    #[instrument(skip(self, family), fields(family = %family.id()))]
    async fn train(&self, family: &ClassFamily, label: Option<&ClassLabel>) -> Result<TrainOutcome> {
        info!("Requesting training run");
        let body = self
            .send(Method::POST, &family.train_path(label), None)
            .await?;
        TrainOutcome::from_response(body)
    }

    #[instrument(skip(self, family), fields(family = %family.id(), label = %label))]
    async fn delete_data(&self, family: &ClassFamily, label: &ClassLabel) -> Result<()> {
        self.delete(&family.data_path(label)).await
    }

    #[instrument(skip(self, family), fields(family = %family.id(), label = %label))]
    async fn delete_model(&self, family: &ClassFamily, label: &ClassLabel) -> Result<()> {
        self.delete(&family.model_path(label)).await
    }
}
