//! Error types for the capture session.
//!
//! Variants are grouped by the stage that produces them: configuration,
//! the landmark pipeline, and calls the session makes to the training
//! service on the user's behalf.

use std::path::PathBuf;

use gesture_backend::{BackendError, FamilyId};

/// A specialized `Result` type for capture session operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors that can occur while running a capture session.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    // ========================================================================
    // Configuration
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your gesture.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Landmark pipeline
    // ========================================================================
    /// Camera permission denied or no capture device available.
    #[error("Camera unavailable: {message}\n\nSuggestion: Check that a camera is connected and that this process may use it")]
    Camera {
        /// Description reported by the detector.
        message: String,
    },

    /// The detector could not be started or its model could not be loaded.
    #[error("Hand detector failed: {message}\n\nSuggestion: Check the 'detector.command' field in gesture.json")]
    Detector {
        /// Description of the failure.
        message: String,
    },

    /// A detected hand did not carry the fixed number of landmarks.
    #[error("Invalid landmark frame: expected {expected} points, got {actual}")]
    InvalidFrame {
        /// Required point count.
        expected: usize,
        /// Point count received.
        actual: usize,
    },

    // ========================================================================
    // Session commands
    // ========================================================================
    /// A label that is not part of the active family.
    #[error("Unknown {family} class '{label}'")]
    UnknownLabel {
        /// Active family.
        family: FamilyId,
        /// Label as the user typed it.
        label: String,
    },

    /// Confirm or cancel with nothing pending.
    #[error("No destructive action is awaiting confirmation")]
    NothingToConfirm,

    // ========================================================================
    // Training service calls
    // ========================================================================
    /// Storing a sample failed. Logged; never fatal.
    #[error("Sample submission failed: {0}")]
    SampleSubmission(#[source] BackendError),

    /// An inference request failed.
    #[error("Prediction failed: {0}")]
    Prediction(#[source] BackendError),

    /// A training run failed.
    #[error("Training failed: {0}")]
    Training(#[source] BackendError),

    /// A confirmed reset or delete failed.
    #[error("Destructive action failed: {0}")]
    DestructiveAction(#[source] BackendError),

    /// Fetching statistics failed.
    #[error("Statistics refresh failed: {0}")]
    Sync(#[source] BackendError),

    // ========================================================================
    // General I/O
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CaptureError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `Camera` error.
    #[must_use]
    pub fn camera(message: impl Into<String>) -> Self {
        Self::Camera {
            message: message.into(),
        }
    }

    /// Creates a new `Detector` error.
    #[must_use]
    pub fn detector(message: impl Into<String>) -> Self {
        Self::Detector {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownLabel` error.
    #[must_use]
    pub fn unknown_label(family: FamilyId, label: impl Into<String>) -> Self {
        Self::UnknownLabel {
            family,
            label: label.into(),
        }
    }

    /// Returns the underlying service error, if any.
    #[must_use]
    pub const fn backend(&self) -> Option<&BackendError> {
        match self {
            Self::SampleSubmission(e)
            | Self::Prediction(e)
            | Self::Training(e)
            | Self::DestructiveAction(e)
            | Self::Sync(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.backend().is_some_and(BackendError::is_transient)
    }

    /// Returns `true` if this error ends the landmark pipeline or the process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::Camera { .. }
                | Self::Detector { .. }
        )
    }
}
