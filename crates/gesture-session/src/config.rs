//! Configuration types for the capture session.
//!
//! Settings are read from `gesture.json` (camelCase keys). Every field has a
//! default, so a missing file or an empty object yields a usable setup that
//! talks to a training service on `localhost:8001`.

use std::path::Path;
use std::time::Duration;

use gesture_backend::{ClassFamily, EndpointTemplates, FamilyId};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "gesture.json";

fn default_backend_url() -> String {
    "http://localhost:8001/api".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_samples_per_class() -> u32 {
    100
}

const fn default_min_samples_to_train() -> u32 {
    2
}

const fn default_prediction_throttle_ms() -> u64 {
    200
}

const fn default_confidence_epsilon() -> f64 {
    0.01
}

const fn default_poll_interval_collecting_ms() -> u64 {
    1000
}

const fn default_poll_interval_idle_ms() -> u64 {
    3000
}

const fn default_control_port() -> u16 {
    3000
}

const fn default_max_hands() -> usize {
    1
}

const fn default_frame_width() -> u32 {
    1280
}

const fn default_frame_height() -> u32 {
    720
}

/// Main configuration for a capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the training service, including the `/api` prefix.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Per-request timeout for training service calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Class family to train.
    #[serde(default)]
    pub family: FamilyId,

    /// Target number of samples per class.
    #[serde(default = "default_samples_per_class")]
    pub samples_per_class: u32,

    /// Minimum samples every targeted class needs before training is requested.
    #[serde(default = "default_min_samples_to_train")]
    pub min_samples_to_train: u32,

    /// Minimum gap between two accepted prediction requests.
    #[serde(default = "default_prediction_throttle_ms")]
    pub prediction_throttle_ms: u64,

    /// Confidence change below which a repeated prediction is not shown.
    #[serde(default = "default_confidence_epsilon")]
    pub confidence_epsilon: f64,

    /// Statistics poll period while collecting.
    #[serde(default = "default_poll_interval_collecting_ms")]
    pub poll_interval_collecting_ms: u64,

    /// Statistics poll period otherwise.
    #[serde(default = "default_poll_interval_idle_ms")]
    pub poll_interval_idle_ms: u64,

    /// How server snapshots merge with optimistic counts.
    #[serde(default)]
    pub reconcile_policy: ReconcilePolicy,

    /// Path segments of the training service endpoints.
    #[serde(default)]
    pub endpoints: EndpointTemplates,

    /// External hand detector settings.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Port of the local control API.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
            family: FamilyId::default(),
            samples_per_class: default_samples_per_class(),
            min_samples_to_train: default_min_samples_to_train(),
            prediction_throttle_ms: default_prediction_throttle_ms(),
            confidence_epsilon: default_confidence_epsilon(),
            poll_interval_collecting_ms: default_poll_interval_collecting_ms(),
            poll_interval_idle_ms: default_poll_interval_idle_ms(),
            reconcile_policy: ReconcilePolicy::default(),
            endpoints: EndpointTemplates::default(),
            detector: DetectorConfig::default(),
            control_port: default_control_port(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `gesture.json` exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            CaptureError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `gesture.json` from `dir`, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the validated defaults.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::ConfigParseError` for unreadable files or
    /// invalid JSON, and `CaptureError::ConfigValidationError` for values
    /// that fail [`Config::validate`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(CaptureError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| CaptureError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::ConfigValidationError` on the first failing check.
    pub fn validate(&self) -> Result<()> {
        if self.backend_url.trim().is_empty() {
            return Err(CaptureError::config_validation(
                "backendUrl must not be empty",
                "Set backendUrl to the training service base URL, e.g. http://localhost:8001/api",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(CaptureError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 in your gesture.json",
            ));
        }

        if self.samples_per_class == 0 {
            return Err(CaptureError::config_validation(
                "samplesPerClass must be greater than 0",
                "Set samplesPerClass to at least 1 in your gesture.json",
            ));
        }

        if self.min_samples_to_train > self.samples_per_class {
            return Err(CaptureError::config_validation(
                format!(
                    "minSamplesToTrain ({}) exceeds samplesPerClass ({})",
                    self.min_samples_to_train, self.samples_per_class
                ),
                "Lower minSamplesToTrain or raise samplesPerClass",
            ));
        }

        if self.prediction_throttle_ms == 0 {
            return Err(CaptureError::config_validation(
                "predictionThrottleMs must be greater than 0",
                "Set predictionThrottleMs to at least 1 (200 is a good start)",
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence_epsilon) {
            return Err(CaptureError::config_validation(
                format!(
                    "confidenceEpsilon must be within [0, 1], got {}",
                    self.confidence_epsilon
                ),
                "Set confidenceEpsilon to a small fraction such as 0.01",
            ));
        }

        if self.poll_interval_collecting_ms == 0 || self.poll_interval_idle_ms == 0 {
            return Err(CaptureError::config_validation(
                "poll intervals must be greater than 0",
                "Set pollIntervalCollectingMs and pollIntervalIdleMs to at least 1",
            ));
        }

        if let Some(name) = self.endpoints.first_empty() {
            return Err(CaptureError::config_validation(
                format!("endpoints.{name} must not be empty"),
                "Remove the entry to use the default path segment",
            ));
        }

        if self.detector.max_hands == 0 {
            return Err(CaptureError::config_validation(
                "detector.maxHands must be greater than 0",
                "Set detector.maxHands to 1",
            ));
        }

        if self.detector.frame_width == 0 || self.detector.frame_height == 0 {
            return Err(CaptureError::config_validation(
                "detector frame size must be non-zero",
                "Set detector.frameWidth and detector.frameHeight, e.g. 1280x720",
            ));
        }

        Ok(())
    }

    /// Builds the family this session trains.
    #[must_use]
    pub fn class_family(&self) -> ClassFamily {
        ClassFamily::with_endpoints(self.family, self.endpoints.clone())
    }

    /// Timeout for every training service request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Minimum spacing between inference requests.
    #[must_use]
    pub const fn prediction_throttle(&self) -> Duration {
        Duration::from_millis(self.prediction_throttle_ms)
    }

    /// Statistics poll period while collecting.
    #[must_use]
    pub const fn poll_interval_collecting(&self) -> Duration {
        Duration::from_millis(self.poll_interval_collecting_ms)
    }

    /// Statistics poll period otherwise.
    #[must_use]
    pub const fn poll_interval_idle(&self) -> Duration {
        Duration::from_millis(self.poll_interval_idle_ms)
    }
}

/// How an authoritative snapshot merges with optimistic local counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Snapshots replace local entries wholesale (default).
    #[default]
    ServerWins,
    /// While collecting a class, a snapshot may not lower that class's count.
    KeepOptimisticWhileCollecting,
}

impl ReconcilePolicy {
    /// Parses a policy name, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "serverwins" => Some(Self::ServerWins),
            "keepoptimisticwhilecollecting" => Some(Self::KeepOptimisticWhileCollecting),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ReconcilePolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid reconcile policy '{s}': expected 'serverWins' or 'keepOptimisticWhileCollecting'"
            ))
        })
    }
}

impl Serialize for ReconcilePolicy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::ServerWins => "serverWins",
            Self::KeepOptimisticWhileCollecting => "keepOptimisticWhileCollecting",
        };
        serializer.serialize_str(s)
    }
}

/// Settings for the external hand detector process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    /// Executable that streams detections as JSON lines on stdout.
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Hands reported per frame; extra hands are dropped.
    #[serde(default = "default_max_hands")]
    pub max_hands: usize,

    /// Frame width used when a detection does not report one.
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,

    /// Frame height used when a detection does not report one.
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            max_hands: default_max_hands(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.backend_url, "http://localhost:8001/api");
        assert_eq!(config.family, FamilyId::Vowels);
        assert_eq!(config.samples_per_class, 100);
        assert_eq!(config.min_samples_to_train, 2);
        assert_eq!(config.prediction_throttle(), Duration::from_millis(200));
        assert_eq!(config.poll_interval_collecting(), Duration::from_secs(1));
        assert_eq!(config.poll_interval_idle(), Duration::from_secs(3));
        assert_eq!(config.reconcile_policy, ReconcilePolicy::ServerWins);
        assert_eq!(config.detector.max_hands, 1);
        assert_eq!(config.control_port, 3000);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "family": "Numeros",
            "samplesPerClass": 50,
            "reconcilePolicy": "keep_optimistic_while_collecting",
            "endpoints": {"collect": "collect"},
            "detector": {"command": "hands-detector", "args": ["--camera", "0"]}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.family, FamilyId::Numbers);
        assert_eq!(config.samples_per_class, 50);
        assert_eq!(
            config.reconcile_policy,
            ReconcilePolicy::KeepOptimisticWhileCollecting
        );
        assert_eq!(config.endpoints.collect, "collect");
        assert_eq!(config.endpoints.train, "entrenar");
        assert_eq!(config.detector.command.as_deref(), Some("hands-detector"));
        assert_eq!(config.detector.frame_width, 1280);
        assert_eq!(config.class_family().labels().len(), 10);
    }

    #[test]
    fn test_reconcile_policy_round_trip_names() {
        let json = serde_json::to_string(&ReconcilePolicy::KeepOptimisticWhileCollecting).unwrap();
        assert_eq!(json, r#""keepOptimisticWhileCollecting""#);
        let policy: ReconcilePolicy = serde_json::from_str(r#""SERVERWINS""#).unwrap();
        assert_eq!(policy, ReconcilePolicy::ServerWins);
    }

    #[test]
    fn test_invalid_reconcile_policy_error() {
        let err = serde_json::from_str::<Config>(r#"{"reconcilePolicy": "clientWins"}"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("invalid reconcile policy"));
        assert!(err.contains("clientWins"));
    }

    #[test]
    fn test_load_from_file_valid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_gesture_valid.json");
        let json = r#"{"family": "operaciones", "predictionThrottleMs": 350}"#;
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.family, FamilyId::Operators);
        assert_eq!(config.prediction_throttle_ms, 350);
        assert_eq!(config.poll_interval_idle_ms, 3000);

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_gesture_invalid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(b"{ family: }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, CaptureError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/gesture.json")).unwrap();
        assert_eq!(config.family, FamilyId::Vowels);
        assert_eq!(config.samples_per_class, 100);
    }

    #[test]
    fn test_load_from_dir_finds_gesture_json() {
        use std::io::Write;

        let dir = std::env::temp_dir().join("test_gesture_dir");
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("gesture.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"controlPort": 4100}"#).unwrap();

        let config = Config::load_from_dir(&dir).unwrap();
        assert_eq!(config.control_port, 4100);

        std::fs::remove_file(&config_path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_validation_min_samples_above_target() {
        let config = Config {
            samples_per_class: 10,
            min_samples_to_train: 11,
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("minSamplesToTrain"));
        assert!(err.contains("Suggestion"));
    }

    #[test]
    fn test_validation_epsilon_range() {
        let config = Config {
            confidence_epsilon: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_values() {
        let cases = [
            Config {
                prediction_throttle_ms: 0,
                ..Config::default()
            },
            Config {
                poll_interval_idle_ms: 0,
                ..Config::default()
            },
            Config {
                samples_per_class: 0,
                min_samples_to_train: 0,
                ..Config::default()
            },
            Config {
                backend_url: "  ".to_string(),
                ..Config::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(
                    config.validate(),
                    Err(CaptureError::ConfigValidationError { .. })
                ),
                "expected validation failure for {config:?}"
            );
        }
    }

    #[test]
    fn test_validation_empty_endpoint() {
        let mut config = Config::default();
        config.endpoints.predict = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("endpoints.predict"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config: Config = serde_json::from_str(r#"{"theme": "dark", "family": "vocales"}"#).unwrap();
        assert_eq!(config.family, FamilyId::Vowels);
    }
}
