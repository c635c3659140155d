//! Gesture Training Service Client
//!
//! Typed async access to the remote service that stores landmark samples,
//! fits per-family classifiers and answers inference requests.
//!
//! This crate provides the class-family catalogue, the wire types the service
//! speaks, and [`HttpTrainingService`], a reqwest-backed implementation of the
//! [`TrainingService`] trait consumed by the capture session.

pub mod client;
pub mod family;
pub mod service;
pub mod stats;
pub mod wire;

use std::sync::OnceLock;

use regex::RegexSet;
use thiserror::Error;

pub use client::HttpTrainingService;
pub use family::{ClassFamily, ClassLabel, EndpointTemplates, FamilyId};
pub use service::TrainingService;
pub use stats::{ClassStats, StatsSnapshot};
pub use wire::{CollectOutcome, Keypoints, Prediction, TrainOutcome};

/// A specialized `Result` type for training service calls.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while talking to the training service.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The service answered with a non-success status.
    #[error("training service rejected the request ({status}): {detail}")]
    Rejected {
        /// HTTP status code returned by the service.
        status: u16,
        /// Human-readable detail string from the response body.
        detail: String,
    },

    /// The request never produced a response (connection, timeout, TLS).
    #[error("training service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not match any known payload shape.
    #[error("unexpected payload from training service: {0}")]
    UnexpectedPayload(String),
}

/// Classification of a service failure, derived from its detail text.
///
/// The service reports failures as free-form strings, so classification
/// matches known substrings case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Not enough samples stored to fit a model.
    InsufficientData,
    /// Inference requested before any model was trained.
    ModelNotTrained,
    /// The class already holds its maximum number of samples.
    LimitReached,
    /// Anything else.
    Other,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient_data"),
            Self::ModelNotTrained => write!(f, "model_not_trained"),
            Self::LimitReached => write!(f, "limit_reached"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Patterns in the same order as the kinds they map to in [`classify_detail`].
const DETAIL_PATTERNS: [&str; 3] = [
    r"(?i)insuficientes|insufficient",
    r"(?i)no hay modelo entrenado|modelo no entrenado|not trained",
    r"(?i)l[ií]mite alcanzado|limit reached",
];

fn detail_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // The patterns are compile-time constants; an empty set only means
        // every detail classifies as `Other`.
        RegexSet::new(DETAIL_PATTERNS).unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Classifies a service detail string.
#[must_use]
pub fn classify_detail(detail: &str) -> ServiceErrorKind {
    let matches = detail_patterns().matches(detail);
    if matches.matched(0) {
        ServiceErrorKind::InsufficientData
    } else if matches.matched(1) {
        ServiceErrorKind::ModelNotTrained
    } else if matches.matched(2) {
        ServiceErrorKind::LimitReached
    } else {
        ServiceErrorKind::Other
    }
}

impl BackendError {
    /// Creates a new `Rejected` error.
    #[must_use]
    pub fn rejected(status: u16, detail: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            detail: detail.into(),
        }
    }

    /// Creates a new `UnexpectedPayload` error.
    #[must_use]
    pub fn unexpected_payload(message: impl Into<String>) -> Self {
        Self::UnexpectedPayload(message.into())
    }

    /// Returns the service-side classification of this error.
    #[must_use]
    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            Self::Rejected { detail, .. } => classify_detail(detail),
            Self::Transport(_) | Self::UnexpectedPayload(_) => ServiceErrorKind::Other,
        }
    }

    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::UnexpectedPayload(_) => false,
        }
    }

    /// Returns the HTTP status if the service answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::Transport(_) | Self::UnexpectedPayload(_) => None,
        }
    }
}
