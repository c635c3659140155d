//! Request and response bodies exchanged with the training service.
//!
//! The service speaks Spanish field names; everything public here uses
//! English names and the private `*Body` structs handle the mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BackendError, Result};

/// Ordered `[x, y, z]` triples in fixed landmark order.
pub type Keypoints = Vec<[f32; 3]>;

/// Body of collect and predict requests.
#[derive(Debug, Serialize)]
pub(crate) struct KeypointsRequest<'a> {
    pub(crate) puntos_clave: &'a [[f32; 3]],
}

/// Body of any non-2xx response.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) detail: Value,
}

impl ErrorBody {
    /// FastAPI validation errors carry a list rather than a string.
    pub(crate) fn into_detail(self) -> String {
        match self.detail {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

/// Result of storing one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectOutcome {
    /// The class was already full; the sample was not stored.
    #[serde(default, rename(deserialize = "limite_alcanzado"))]
    pub limit_reached: bool,
    /// Stored sample count after this request, when reported.
    #[serde(default, rename(deserialize = "total_muestras"))]
    pub total_samples: Option<u32>,
}

/// Result of one inference request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Label the model picked, if any.
    pub predicted_class: Option<String>,
    /// Confidence of `predicted_class` in `[0, 1]`.
    pub confidence: f64,
    /// Per-class probabilities, when reported.
    #[serde(default)]
    pub all_probabilities: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct PredictionBody {
    #[serde(default, alias = "prediccion")]
    clase_predicha: Option<String>,
    #[serde(default)]
    confianza: Option<f64>,
    #[serde(default)]
    todas_las_probabilidades: Option<BTreeMap<String, f64>>,
}

impl Prediction {
    /// Parses a predict response, with or without the `prediccion` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnexpectedPayload`] if the body is not an object
    /// of the expected shape.
    pub fn from_response(body: Value) -> Result<Self> {
        let inner = match body {
            Value::Object(mut map) => match map.remove("prediccion") {
                Some(inner @ Value::Object(_)) => inner,
                Some(other) => {
                    map.insert("prediccion".to_string(), other);
                    Value::Object(map)
                }
                None => Value::Object(map),
            },
            other => {
                return Err(BackendError::unexpected_payload(format!(
                    "prediction response is not an object: {other}"
                )))
            }
        };
        let body: PredictionBody = serde_json::from_value(inner)
            .map_err(|e| BackendError::unexpected_payload(format!("prediction: {e}")))?;
        Ok(Self {
            predicted_class: body.clase_predicha,
            confidence: body.confianza.unwrap_or_default(),
            all_probabilities: body.todas_las_probabilidades.unwrap_or_default(),
        })
    }
}

/// Result of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOutcome {
    /// Whether the service reports the run as successful.
    pub success: bool,
    /// Validation accuracy, either a fraction or a percentage.
    pub accuracy: Option<f64>,
    /// Validation loss, when reported.
    pub loss: Option<f64>,
    /// Epochs actually run.
    pub epochs: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TrainBody {
    #[serde(default)]
    exito: Option<bool>,
    #[serde(default, alias = "precision")]
    precision_validacion: Option<f64>,
    #[serde(default, alias = "perdida")]
    perdida_validacion: Option<f64>,
    #[serde(default)]
    epocas: Option<u32>,
}

impl TrainOutcome {
    /// Parses a train response. A 2xx response without an explicit `exito`
    /// flag counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnexpectedPayload`] if `resultado` has the
    /// wrong shape.
    pub fn from_response(body: Value) -> Result<Self> {
        let inner = match body {
            Value::Object(mut map) => map.remove("resultado").unwrap_or(Value::Object(map)),
            other => {
                return Err(BackendError::unexpected_payload(format!(
                    "train response is not an object: {other}"
                )))
            }
        };
        let body: TrainBody = serde_json::from_value(inner)
            .map_err(|e| BackendError::unexpected_payload(format!("training result: {e}")))?;
        Ok(Self {
            success: body.exito.unwrap_or(true),
            accuracy: body.precision_validacion,
            loss: body.perdida_validacion,
            epochs: body.epocas,
        })
    }
}
