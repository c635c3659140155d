//! Gesture capture session
//!
//! Turns live hand landmarks into labeled samples, drives the
//! collect/train/predict state machine and keeps local progress in step with
//! the training service.

pub mod api;
pub mod config;
pub mod confirm;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod landmarks;
mod messages;
pub mod overlay;
pub mod progress;
pub mod session;
pub mod source;
pub mod sync;
pub mod throttle;
pub mod websocket;

pub use api::{create_router, ErrorResponse, TrainRequest};
pub use config::{Config, DetectorConfig, ReconcilePolicy};
pub use confirm::{BackendCall, ConfirmationGate, DestructiveAction, PendingDestructiveAction};
pub use coordinator::Coordinator;
pub use detector::{ProcessDetector, ReplayDetector};
pub use error::{CaptureError, Result};
pub use landmarks::{Landmark, LandmarkFrame, HAND_CONNECTIONS, LANDMARK_COUNT};
pub use messages::display_accuracy;
pub use overlay::{Overlay, Segment};
pub use progress::{PerClassProgress, ProgressStore, TotalProgress};
pub use session::{
    Activity, CaptureSession, Effect, SessionMode, SessionSettings, SessionSnapshot, TrainTarget,
    Transition,
};
pub use source::{Detection, FrameLoop, FrameLoopHandle, FrameSink, LandmarkDetector, StartFailure};
pub use sync::{SyncHandle, SyncIntervals, SyncScheduler};
pub use throttle::{PredictionPermit, PredictionThrottle, Throttled};
pub use websocket::{EventBroadcaster, SessionEvent};
