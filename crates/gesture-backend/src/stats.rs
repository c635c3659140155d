//! Normalization of the statistics payloads the service has shipped over time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{family::FamilyId, BackendError, Result};

/// Server-side counters for one class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    /// Samples stored on the server.
    pub total_samples: u32,
    /// Target sample count, when the payload reports one.
    pub recommended_max: Option<u32>,
    /// Percentage as reported; callers recompute it from the counts.
    pub percentage: Option<f64>,
    /// Whether a trained model exists for the class.
    pub has_model: bool,
}

/// Per-class statistics for one family, keyed by wire label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Statistics by lowercase wire label.
    pub classes: BTreeMap<String, ClassStats>,
}

impl StatsSnapshot {
    /// Parses a statistics response for `family`.
    ///
    /// The current shape nests per-class objects under
    /// `estadisticas_<family>` with `total_muestras`, `cantidad_recomendada`,
    /// `progreso_porcentaje` and `tiene_modelo`. The legacy shape nests them
    /// under `<family>` with `cantidad`, `max` and `porcentaje`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnexpectedPayload`] if neither shape is present.
    pub fn from_response(family: FamilyId, body: &Value) -> Result<Self> {
        if let Some(classes) = body.get(family.stats_key()).and_then(Value::as_object) {
            return Ok(Self::collect(classes, current_entry));
        }
        for key in family.legacy_stats_keys() {
            if let Some(classes) = body.get(*key).and_then(Value::as_object) {
                return Ok(Self::collect(classes, legacy_entry));
            }
        }
        Err(BackendError::unexpected_payload(format!(
            "statistics for '{family}' carry neither '{}' nor '{}'",
            family.stats_key(),
            family.wire_name()
        )))
    }

    fn collect(classes: &Map<String, Value>, entry: fn(&Value) -> ClassStats) -> Self {
        Self {
            classes: classes
                .iter()
                .filter(|(_, value)| value.is_object())
                .map(|(label, value)| (label.to_lowercase(), entry(value)))
                .collect(),
        }
    }

    /// Returns the entry for `label`, if the snapshot has one.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&ClassStats> {
        self.classes.get(label)
    }

    /// Returns `true` if the service reports a model for any class.
    #[must_use]
    pub fn any_model(&self) -> bool {
        self.classes.values().any(|c| c.has_model)
    }
}

fn current_entry(value: &Value) -> ClassStats {
    ClassStats {
        total_samples: count(value.get("total_muestras")),
        recommended_max: value.get("cantidad_recomendada").map(|v| count(Some(v))),
        percentage: value.get("progreso_porcentaje").and_then(Value::as_f64),
        has_model: value
            .get("tiene_modelo")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

fn legacy_entry(value: &Value) -> ClassStats {
    ClassStats {
        total_samples: count(value.get("cantidad")),
        recommended_max: value.get("max").map(|v| count(Some(v))),
        percentage: value.get("porcentaje").and_then(Value::as_f64),
        has_model: false,
    }
}

/// Reads a non-negative count that may be encoded as an integer or a float.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count(value: Option<&Value>) -> u32 {
    match value {
        Some(v) => v
            .as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .or_else(|| v.as_f64().map(|f| f.max(0.0).round() as u32))
            .unwrap_or(0),
        None => 0,
    }
}
