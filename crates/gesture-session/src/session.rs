//! Capture session state machine.
//!
//! [`CaptureSession`] is mutated only through [`CaptureSession::apply`], which
//! takes one [`Transition`] and returns the [`Effect`]s the caller must run.
//! Effect results come back as further transitions, so every change to the
//! session goes through this module.
//!
//! Collecting and predicting are mutually exclusive and both live in
//! [`Activity`]; training is an independent flag that forces the activity
//! back to idle when it starts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use gesture_backend::{
    BackendError, ClassFamily, ClassLabel, FamilyId, Keypoints, Prediction, ServiceErrorKind,
    StatsSnapshot, TrainOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, ReconcilePolicy};
use crate::confirm::{DestructiveAction, PendingDestructiveAction};
use crate::landmarks::LandmarkFrame;
use crate::messages;
use crate::progress::{PerClassProgress, ProgressStore, TotalProgress};

// ============================================================================
// Modes
// ============================================================================

/// What the session does with incoming frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "activity", content = "label", rename_all = "snake_case")]
pub enum Activity {
    /// Frames are shown but not used.
    #[default]
    Idle,
    /// Frames become samples of this class.
    Collecting(ClassLabel),
    /// Frames are sent for inference.
    Predicting,
}

/// Coarse mode, as shown to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Nothing is being collected or predicted.
    #[default]
    Idle,
    /// Frames are stored as samples.
    Collecting,
    /// A training run is in progress.
    Training,
    /// Frames are sent for inference.
    Predicting,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Collecting => write!(f, "collecting"),
            Self::Training => write!(f, "training"),
            Self::Predicting => write!(f, "predicting"),
        }
    }
}

/// Scope of a training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "label", rename_all = "snake_case")]
pub enum TrainTarget {
    /// Every class of the family.
    Family,
    /// A single class.
    Class(ClassLabel),
}

impl TrainTarget {
    /// The label sent to the service, `None` for the whole family.
    #[must_use]
    pub const fn label(&self) -> Option<&ClassLabel> {
        match self {
            Self::Family => None,
            Self::Class(label) => Some(label),
        }
    }
}

// ============================================================================
// Transitions and effects
// ============================================================================

/// Input to the state machine.
#[derive(Debug)]
pub enum Transition {
    /// Begin collecting samples for a class.
    StartCollecting(ClassLabel),
    /// Stop collecting.
    StopCollecting,
    /// A detected hand from the landmark source.
    Frame(LandmarkFrame),
    /// Train one class or the whole family.
    RequestTraining(TrainTarget),
    /// A training run returned.
    TrainingFinished {
        /// What was trained.
        target: TrainTarget,
        /// The service's answer.
        result: Result<TrainOutcome, BackendError>,
    },
    /// Switch live prediction on or off.
    TogglePrediction,
    /// An inference response for a frame sent during prediction run `epoch`.
    PredictionFinished {
        /// Prediction run the frame was sent in.
        epoch: u64,
        /// The service's answer.
        result: Result<Prediction, BackendError>,
    },
    /// Authoritative statistics from the service.
    StatsArrived(StatsSnapshot),
    /// The operator confirmed a destructive action.
    DestructiveConfirmed(DestructiveAction),
    /// A confirmed destructive action finished its service calls.
    DestructiveFinished {
        /// The confirmed action.
        action: DestructiveAction,
        /// First failed call, if any.
        result: Result<(), BackendError>,
    },
    /// The camera or detector failed for good.
    PipelineFailed(String),
    /// The landmark pipeline started again.
    PipelineRecovered,
}

impl Transition {
    const fn name(&self) -> &'static str {
        match self {
            Self::StartCollecting(_) => "start_collecting",
            Self::StopCollecting => "stop_collecting",
            Self::Frame(_) => "frame",
            Self::RequestTraining(_) => "request_training",
            Self::TrainingFinished { .. } => "training_finished",
            Self::TogglePrediction => "toggle_prediction",
            Self::PredictionFinished { .. } => "prediction_finished",
            Self::StatsArrived(_) => "stats_arrived",
            Self::DestructiveConfirmed(_) => "destructive_confirmed",
            Self::DestructiveFinished { .. } => "destructive_finished",
            Self::PipelineFailed(_) => "pipeline_failed",
            Self::PipelineRecovered => "pipeline_recovered",
        }
    }
}

/// Work the caller must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Store one sample; a statistics refresh follows it.
    SubmitSample {
        /// Class the sample belongs to.
        label: ClassLabel,
        /// The hand, as `[x, y, z]` triples.
        keypoints: Keypoints,
    },
    /// Classify one frame, subject to the prediction throttle.
    Predict {
        /// Model to ask; the service picks when `None`.
        label: Option<ClassLabel>,
        /// The hand, as `[x, y, z]` triples.
        keypoints: Keypoints,
        /// Prediction run the frame belongs to.
        epoch: u64,
    },
    /// Refresh statistics from the service.
    FetchStats,
    /// Start a training run.
    Train(TrainTarget),
    /// Issue the service calls of a confirmed destructive action.
    RunDestructive(DestructiveAction),
}

// ============================================================================
// Session
// ============================================================================

/// Tunables the state machine needs from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    /// Default sample target per class.
    pub samples_per_class: u32,
    /// Samples every trained class needs.
    pub min_samples_to_train: u32,
    /// Smallest confidence change that updates the prediction.
    pub confidence_epsilon: f64,
    /// How server counts replace optimistic ones.
    pub reconcile_policy: ReconcilePolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            samples_per_class: config.samples_per_class,
            min_samples_to_train: config.min_samples_to_train,
            confidence_epsilon: config.confidence_epsilon,
            reconcile_policy: config.reconcile_policy,
        }
    }
}

/// The aggregate root of one capture session.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    family: ClassFamily,
    settings: SessionSettings,
    activity: Activity,
    training: bool,
    model_trained: bool,
    trained_target: Option<TrainTarget>,
    prediction: Option<String>,
    prediction_epoch: u64,
    confidence: Option<f64>,
    all_probabilities: BTreeMap<String, f64>,
    training_accuracy: Option<f64>,
    status_message: String,
    progress: ProgressStore,
    pipeline_error: Option<String>,
    revision: u64,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CaptureSession {
    /// Creates an idle session with zeroed progress.
    #[must_use]
    pub fn new(family: ClassFamily, settings: SessionSettings) -> Self {
        let now = Utc::now();
        Self {
            progress: ProgressStore::new(&family, settings.samples_per_class),
            status_message: messages::idle(family.id()),
            family,
            settings,
            activity: Activity::Idle,
            training: false,
            model_trained: false,
            trained_target: None,
            prediction: None,
            prediction_epoch: 0,
            confidence: None,
            all_probabilities: BTreeMap::new(),
            training_accuracy: None,
            pipeline_error: None,
            revision: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Family being trained.
    #[must_use]
    pub const fn family(&self) -> &ClassFamily {
        &self.family
    }

    /// What the session is doing with frames.
    #[must_use]
    pub const fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Returns `true` while a training run is in progress.
    #[must_use]
    pub const fn is_training(&self) -> bool {
        self.training
    }

    /// Returns `true` while frames are sent for inference.
    #[must_use]
    pub const fn is_predicting(&self) -> bool {
        matches!(self.activity, Activity::Predicting)
    }

    /// Number of times prediction has been switched on.
    #[must_use]
    pub const fn prediction_epoch(&self) -> u64 {
        self.prediction_epoch
    }

    /// Label being collected, if any.
    #[must_use]
    pub const fn active_label(&self) -> Option<&ClassLabel> {
        match &self.activity {
            Activity::Collecting(label) => Some(label),
            Activity::Idle | Activity::Predicting => None,
        }
    }

    /// Coarse mode; training takes precedence.
    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        if self.training {
            return SessionMode::Training;
        }
        match self.activity {
            Activity::Idle => SessionMode::Idle,
            Activity::Collecting(_) => SessionMode::Collecting,
            Activity::Predicting => SessionMode::Predicting,
        }
    }

    /// Per-class progress.
    #[must_use]
    pub const fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Latest message for the operator.
    #[must_use]
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Incremented on every observable change.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Updates the revision and `updated_at` timestamp.
    pub fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    /// Time since the session was created.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    fn noun(&self) -> FamilyId {
        self.family.id()
    }

    /// Label the inference request targets: the class trained last, or the
    /// whole family.
    fn predict_label(&self) -> Option<ClassLabel> {
        self.trained_target
            .as_ref()
            .and_then(TrainTarget::label)
            .cloned()
    }

    /// Applies one transition and returns the effects to run.
    pub fn apply(&mut self, transition: Transition) -> Vec<Effect> {
        let name = transition.name();
        let before = self.revision;
        let effects = match transition {
            Transition::StartCollecting(label) => self.start_collecting(label),
            Transition::StopCollecting => self.stop_collecting(),
            Transition::Frame(frame) => self.on_frame(&frame),
            Transition::RequestTraining(target) => self.request_training(target),
            Transition::TrainingFinished { target, result } => {
                self.training_finished(target, result)
            }
            Transition::TogglePrediction => self.toggle_prediction(),
            Transition::PredictionFinished { epoch, result } => {
                self.prediction_finished(epoch, result)
            }
            Transition::StatsArrived(snapshot) => self.stats_arrived(&snapshot),
            Transition::DestructiveConfirmed(action) => self.destructive_confirmed(action),
            Transition::DestructiveFinished { action, result } => {
                self.destructive_finished(&action, result)
            }
            Transition::PipelineFailed(message) => self.pipeline_failed(message),
            Transition::PipelineRecovered => self.pipeline_recovered(),
        };
        if self.revision != before {
            debug!(
                transition = name,
                mode = %self.mode(),
                revision = self.revision,
                effects = effects.len(),
                "Applied transition"
            );
        }
        effects
    }

    fn start_collecting(&mut self, label: ClassLabel) -> Vec<Effect> {
        if !self.family.contains(&label) {
            warn!(label = %label, "Ignoring collection for a label outside the family");
            return Vec::new();
        }
        if let Some(error) = &self.pipeline_error {
            warn!(label = %label, error = %error, "Cannot collect while the landmark pipeline is down");
            return Vec::new();
        }
        if self.training {
            warn!(label = %label, "Cannot collect while training");
            self.set_status(messages::BUSY_TRAINING);
            self.touch();
            return Vec::new();
        }
        if self.is_predicting() {
            warn!(label = %label, "Cannot collect while predicting");
            return Vec::new();
        }
        if self.progress.is_complete(&label) {
            warn!(label = %label, "Class already has all its samples");
            self.set_status(messages::already_complete(self.noun(), &label));
            self.touch();
            return Vec::new();
        }

        info!(label = %label, "Collecting samples");
        self.set_status(messages::collecting(self.noun(), &label));
        self.activity = Activity::Collecting(label);
        self.touch();
        Vec::new()
    }

    fn stop_collecting(&mut self) -> Vec<Effect> {
        if self.active_label().is_none() {
            return Vec::new();
        }
        info!("Stopped collecting");
        self.activity = Activity::Idle;
        self.set_status(messages::idle(self.noun()));
        self.touch();
        vec![Effect::FetchStats]
    }

    fn on_frame(&mut self, frame: &LandmarkFrame) -> Vec<Effect> {
        match &self.activity {
            Activity::Idle => Vec::new(),
            Activity::Predicting => vec![Effect::Predict {
                label: self.predict_label(),
                keypoints: frame.keypoints(),
                epoch: self.prediction_epoch,
            }],
            Activity::Collecting(label) => {
                let label = label.clone();
                if self.progress.is_complete(&label) {
                    self.auto_stop(&label);
                    return vec![Effect::FetchStats];
                }

                let percentage = self.progress.increment(&label).unwrap_or_default();
                let mut effects = vec![Effect::SubmitSample {
                    label: label.clone(),
                    keypoints: frame.keypoints(),
                }];
                if percentage >= 100.0 {
                    self.auto_stop(&label);
                    effects.push(Effect::FetchStats);
                }
                self.touch();
                effects
            }
        }
    }

    fn auto_stop(&mut self, label: &ClassLabel) {
        let max = self.progress.get(label).map_or(self.settings.samples_per_class, |e| e.max);
        info!(label = %label, max, "Class complete, stopping collection");
        self.activity = Activity::Idle;
        self.set_status(messages::collection_complete(self.noun(), label, max));
        self.touch();
    }

    fn request_training(&mut self, target: TrainTarget) -> Vec<Effect> {
        if self.training {
            warn!("Training already in progress");
            self.set_status(messages::TRAINING_BUSY);
            self.touch();
            return Vec::new();
        }
        let labels: Vec<ClassLabel> = match &target {
            TrainTarget::Family => self.family.labels().to_vec(),
            TrainTarget::Class(label) if self.family.contains(label) => vec![label.clone()],
            TrainTarget::Class(label) => {
                warn!(label = %label, "Ignoring training for a label outside the family");
                return Vec::new();
            }
        };

        let min = self.settings.min_samples_to_train;
        let insufficient = self.progress.insufficient_for_training(&labels, min);
        if !insufficient.is_empty() {
            warn!(
                insufficient = ?insufficient.iter().map(ClassLabel::as_str).collect::<Vec<_>>(),
                min,
                "Not enough samples to train"
            );
            self.set_status(messages::training_insufficient_classes(&insufficient, min));
            self.touch();
            return Vec::new();
        }

        info!(target = ?target, "Training requested");
        self.activity = Activity::Idle;
        self.training = true;
        self.set_status(messages::TRAINING);
        self.touch();
        vec![Effect::Train(target)]
    }

    fn training_finished(
        &mut self,
        target: TrainTarget,
        result: Result<TrainOutcome, BackendError>,
    ) -> Vec<Effect> {
        self.training = false;
        match result {
            Ok(outcome) if outcome.success => {
                info!(accuracy = ?outcome.accuracy, epochs = ?outcome.epochs, "Training complete");
                self.model_trained = true;
                self.trained_target = Some(target);
                self.training_accuracy = outcome.accuracy;
                self.set_status(messages::training_success(outcome.accuracy));
            }
            Ok(_) => {
                warn!("Service reported an unsuccessful training run");
                self.set_status(messages::TRAINING_ERROR);
            }
            Err(e) => {
                warn!(error = %e, "Training failed");
                let message = if e.kind() == ServiceErrorKind::InsufficientData {
                    messages::TRAINING_INSUFFICIENT_DATA
                } else {
                    messages::TRAINING_ERROR
                };
                self.set_status(message);
            }
        }
        self.touch();
        vec![Effect::FetchStats]
    }

    fn toggle_prediction(&mut self) -> Vec<Effect> {
        if self.is_predicting() {
            info!("Prediction stopped");
            self.activity = Activity::Idle;
            self.set_status(messages::idle(self.noun()));
            self.touch();
            return Vec::new();
        }
        if !self.model_trained {
            warn!("Cannot predict without a trained model");
            return Vec::new();
        }
        if self.training {
            warn!("Cannot predict while training");
            self.set_status(messages::BUSY_TRAINING);
            self.touch();
            return Vec::new();
        }
        if let Some(error) = &self.pipeline_error {
            warn!(error = %error, "Cannot predict while the landmark pipeline is down");
            return Vec::new();
        }

        self.prediction_epoch += 1;
        info!(epoch = self.prediction_epoch, "Prediction started");
        self.activity = Activity::Predicting;
        self.prediction = None;
        self.confidence = None;
        self.all_probabilities.clear();
        self.set_status(messages::PREDICTING);
        self.touch();
        Vec::new()
    }

    fn prediction_finished(
        &mut self,
        epoch: u64,
        result: Result<Prediction, BackendError>,
    ) -> Vec<Effect> {
        if !self.is_predicting() {
            debug!("Discarding prediction that arrived after prediction stopped");
            return Vec::new();
        }
        if epoch != self.prediction_epoch {
            debug!(
                epoch,
                current = self.prediction_epoch,
                "Discarding prediction from an earlier run"
            );
            return Vec::new();
        }
        match result {
            Ok(prediction) => {
                let moved = self.confidence.map_or(true, |c| {
                    (prediction.confidence - c).abs() > self.settings.confidence_epsilon
                });
                if prediction.predicted_class != self.prediction || moved {
                    self.prediction = prediction.predicted_class;
                    self.confidence = Some(prediction.confidence);
                    self.all_probabilities = prediction.all_probabilities;
                    self.touch();
                }
            }
            Err(e) if e.kind() == ServiceErrorKind::ModelNotTrained => {
                warn!(error = %e, "Service has no trained model, stopping prediction");
                self.activity = Activity::Idle;
                self.set_status(messages::PREDICTION_NO_MODEL);
                self.touch();
            }
            Err(e) => {
                warn!(error = %e, "Prediction failed");
                self.set_status(messages::PREDICTION_ERROR);
                self.touch();
            }
        }
        Vec::new()
    }

    fn stats_arrived(&mut self, snapshot: &StatsSnapshot) -> Vec<Effect> {
        let before = self.progress.clone();
        let collecting = self.active_label().cloned();
        self.progress.apply_snapshot(
            snapshot,
            collecting.as_ref(),
            self.settings.reconcile_policy,
        );
        let mut changed = self.progress != before;

        if self.progress.any_model() && !self.model_trained {
            info!("Service reports a trained model");
            self.model_trained = true;
            changed = true;
        }
        if self.progress.all_complete()
            && self.activity == Activity::Idle
            && !self.training
            && self.pipeline_error.is_none()
            && self.status_message != messages::READY_TO_TRAIN
        {
            self.set_status(messages::READY_TO_TRAIN);
            changed = true;
        }
        if changed {
            self.touch();
        }
        Vec::new()
    }

    fn destructive_confirmed(&mut self, action: DestructiveAction) -> Vec<Effect> {
        info!(action = ?action, "Destructive action confirmed");
        self.set_status(messages::DELETING);
        self.touch();
        vec![Effect::RunDestructive(action)]
    }

    fn destructive_finished(
        &mut self,
        action: &DestructiveAction,
        result: Result<(), BackendError>,
    ) -> Vec<Effect> {
        match result {
            Ok(()) => {
                info!(action = ?action, "Destructive action complete");
                match action {
                    DestructiveAction::ResetFamily => {
                        self.progress.clear_all();
                        self.model_trained = false;
                        self.trained_target = None;
                        self.training_accuracy = None;
                        self.prediction = None;
                        self.confidence = None;
                        self.all_probabilities.clear();
                        if self.is_predicting() {
                            self.activity = Activity::Idle;
                        }
                        self.set_status(messages::RESET);
                    }
                    DestructiveAction::ResetClass(label) => {
                        self.progress.clear(label);
                        self.model_trained = self.progress.any_model();
                        if self.trained_target.as_ref().and_then(TrainTarget::label) == Some(label) {
                            self.trained_target = None;
                        }
                        self.set_status(messages::class_reset(self.noun(), label));
                    }
                    DestructiveAction::DeleteClassData(label) => {
                        self.progress.clear_samples(label);
                        self.set_status(messages::class_deleted(self.noun(), label));
                    }
                }
            }
            Err(e) => {
                warn!(action = ?action, error = %e, "Destructive action failed");
                self.set_status(messages::DESTRUCTIVE_FAILED);
            }
        }
        self.touch();
        vec![Effect::FetchStats]
    }

    fn pipeline_failed(&mut self, message: String) -> Vec<Effect> {
        warn!(error = %message, "Landmark pipeline failed");
        self.activity = Activity::Idle;
        self.set_status(messages::pipeline_error(&message));
        self.pipeline_error = Some(message);
        self.touch();
        Vec::new()
    }

    fn pipeline_recovered(&mut self) -> Vec<Effect> {
        if self.pipeline_error.take().is_some() {
            info!("Landmark pipeline recovered");
            self.set_status(messages::idle(self.noun()));
            self.touch();
        }
        Vec::new()
    }

    /// Serializable view of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            family: self.family.id(),
            mode: self.mode(),
            active_label: self.active_label().cloned(),
            collecting: self.active_label().is_some(),
            training: self.training,
            predicting: self.is_predicting(),
            model_trained: self.model_trained,
            prediction: self.prediction.clone(),
            confidence: self.confidence,
            all_probabilities: self.all_probabilities.clone(),
            training_accuracy: self.training_accuracy,
            status_message: self.status_message.clone(),
            progress: self.progress.entries().to_vec(),
            total: self.progress.total(),
            pipeline_error: self.pipeline_error.clone(),
            pending_confirmation: None,
            revision: self.revision,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of a [`CaptureSession`], as sent to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Family being trained.
    pub family: FamilyId,
    /// Coarse mode.
    pub mode: SessionMode,
    /// Class being collected.
    pub active_label: Option<ClassLabel>,
    /// Whether a class is being collected.
    pub collecting: bool,
    /// Whether a training run is in progress.
    pub training: bool,
    /// Whether live prediction is on.
    pub predicting: bool,
    /// Whether any class has a trained model.
    pub model_trained: bool,
    /// Latest predicted class.
    pub prediction: Option<String>,
    /// Confidence of `prediction`, 0 to 1.
    pub confidence: Option<f64>,
    /// Probability of every class in the latest prediction.
    pub all_probabilities: BTreeMap<String, f64>,
    /// Validation accuracy of the last run, as reported.
    pub training_accuracy: Option<f64>,
    /// Latest message for the operator.
    pub status_message: String,
    /// Per-class progress in family order.
    pub progress: Vec<PerClassProgress>,
    /// Progress across the family.
    pub total: TotalProgress,
    /// Why the landmark pipeline is down, if it is.
    pub pipeline_error: Option<String>,
    /// Destructive action awaiting confirmation, if any.
    pub pending_confirmation: Option<PendingDestructiveAction>,
    /// Incremented on every observable change.
    pub revision: u64,
    /// Time of the last change.
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Progress entry of `label`.
    #[must_use]
    pub fn class(&self, label: &str) -> Option<&PerClassProgress> {
        self.progress.iter().find(|e| e.label.as_str() == label)
    }
}
