//! Runs the session against a training service.
//!
//! The [`Coordinator`] is the only owner of the [`CaptureSession`]. Every
//! command and every service response becomes one [`Transition`] applied
//! under the session lock; the returned effects are then executed in
//! spawned tasks whose results re-enter the same way.

use std::sync::Arc;

use gesture_backend::{BackendError, ClassFamily, ClassLabel, TrainingService};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::confirm::{BackendCall, ConfirmationGate, DestructiveAction, PendingDestructiveAction};
use crate::error::{CaptureError, Result};
use crate::landmarks::LandmarkFrame;
use crate::messages;
use crate::overlay::Overlay;
use crate::session::{
    CaptureSession, Effect, SessionSettings, SessionSnapshot, TrainTarget, Transition,
};
use crate::source::FrameSink;
use crate::throttle::{PredictionPermit, PredictionThrottle};
use crate::websocket::{EventBroadcaster, SessionEvent};

/// Shared handle to a running session. Cloning is cheap.
pub struct Coordinator<B: TrainingService> {
    inner: Arc<Inner<B>>,
}

impl<B: TrainingService> Clone for Coordinator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B> {
    family: ClassFamily,
    service: B,
    session: Mutex<CaptureSession>,
    throttle: PredictionThrottle,
    gate: Mutex<ConfirmationGate>,
    events: EventBroadcaster,
    collecting: watch::Sender<bool>,
    /// Effects still running.
    tasks: watch::Sender<usize>,
}

/// Decrements the running-effect counter when the effect ends.
struct TaskGuard(watch::Sender<usize>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl<B: TrainingService> Coordinator<B> {
    /// Creates a coordinator for the family, tunables and throttle of `config`.
    #[must_use]
    pub fn new(service: B, config: &Config) -> Self {
        let family = config.class_family();
        let session = CaptureSession::new(family.clone(), SessionSettings::from(config));
        let throttle = PredictionThrottle::new(config.prediction_throttle());
        Self::with_session(service, session, throttle)
    }

    /// Creates a coordinator around an existing session.
    #[must_use]
    pub fn with_session(service: B, session: CaptureSession, throttle: PredictionThrottle) -> Self {
        let (collecting, _) = watch::channel(session.active_label().is_some());
        let (tasks, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                family: session.family().clone(),
                service,
                session: Mutex::new(session),
                throttle,
                gate: Mutex::new(ConfirmationGate::new()),
                events: EventBroadcaster::default(),
                collecting,
                tasks,
            }),
        }
    }

    /// Family this coordinator drives.
    #[must_use]
    pub fn family(&self) -> &ClassFamily {
        &self.inner.family
    }

    /// Training service client.
    #[must_use]
    pub fn service(&self) -> &B {
        &self.inner.service
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Watches whether a class is being collected.
    #[must_use]
    pub fn collecting_watch(&self) -> watch::Receiver<bool> {
        self.inner.collecting.subscribe()
    }

    /// Current session, including any pending confirmation.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let session = self.inner.session.lock().await;
        self.decorate(session.snapshot()).await
    }

    async fn decorate(&self, mut snapshot: SessionSnapshot) -> SessionSnapshot {
        snapshot.pending_confirmation = self.inner.gate.lock().await.pending().cloned();
        snapshot
    }

    fn label(&self, input: &str) -> Result<ClassLabel> {
        self.inner
            .family
            .parse_label(input)
            .ok_or_else(|| CaptureError::unknown_label(self.inner.family.id(), input))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Starts collecting samples for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::UnknownLabel`] if `label` is not in the family.
    /// A rejected start is not an error; the snapshot carries the reason.
    pub async fn start_collecting(&self, label: &str) -> Result<SessionSnapshot> {
        let label = self.label(label)?;
        Ok(self.dispatch(Transition::StartCollecting(label)).await)
    }

    /// Stops collecting. A no-op when not collecting.
    pub async fn stop_collecting(&self) -> SessionSnapshot {
        self.dispatch(Transition::StopCollecting).await
    }

    /// Trains one class, or the whole family when `label` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::UnknownLabel`] if `label` is not in the family.
    pub async fn train(&self, label: Option<&str>) -> Result<SessionSnapshot> {
        let target = match label {
            Some(label) => TrainTarget::Class(self.label(label)?),
            None => TrainTarget::Family,
        };
        Ok(self.dispatch(Transition::RequestTraining(target)).await)
    }

    /// Turns live prediction on or off.
    pub async fn toggle_prediction(&self) -> SessionSnapshot {
        self.dispatch(Transition::TogglePrediction).await
    }

    /// Asks for confirmation before deleting everything in the family.
    pub async fn request_reset(&self) -> PendingDestructiveAction {
        let message = messages::confirm_reset_family(self.inner.family.id());
        self.request(DestructiveAction::ResetFamily, message).await
    }

    /// Asks for confirmation before deleting the samples and model of `label`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::UnknownLabel`] if `label` is not in the family.
    pub async fn request_class_reset(&self, label: &str) -> Result<PendingDestructiveAction> {
        let label = self.label(label)?;
        let message = messages::confirm_reset_class(self.inner.family.id(), &label);
        Ok(self.request(DestructiveAction::ResetClass(label), message).await)
    }

    /// Asks for confirmation before deleting the samples of `label`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::UnknownLabel`] if `label` is not in the family.
    pub async fn request_delete(&self, label: &str) -> Result<PendingDestructiveAction> {
        let label = self.label(label)?;
        let message = messages::confirm_delete_class(self.inner.family.id(), &label);
        Ok(self.request(DestructiveAction::DeleteClassData(label), message).await)
    }

    async fn request(
        &self,
        action: DestructiveAction,
        message: String,
    ) -> PendingDestructiveAction {
        let pending = self.inner.gate.lock().await.request(action, message);
        info!(action = ?pending.action, "Destructive action awaiting confirmation");
        self.inner
            .events
            .send(SessionEvent::ConfirmationRequested(pending.clone()));
        pending
    }

    /// Executes the pending destructive action.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NothingToConfirm`] if nothing is pending.
    pub async fn confirm(&self) -> Result<SessionSnapshot> {
        let action = self
            .inner
            .gate
            .lock()
            .await
            .confirm()
            .ok_or(CaptureError::NothingToConfirm)?;
        self.inner
            .events
            .send(SessionEvent::confirmation_resolved(action.clone(), true));
        Ok(self.dispatch(Transition::DestructiveConfirmed(action)).await)
    }

    /// Discards the pending destructive action without touching the service.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NothingToConfirm`] if nothing is pending.
    pub async fn cancel(&self) -> Result<PendingDestructiveAction> {
        let pending = self
            .inner
            .gate
            .lock()
            .await
            .cancel()
            .ok_or(CaptureError::NothingToConfirm)?;
        info!(action = ?pending.action, "Destructive action cancelled");
        self.inner
            .events
            .send(SessionEvent::confirmation_resolved(pending.action.clone(), false));
        Ok(pending)
    }

    /// Records a fatal camera or detector failure.
    pub async fn pipeline_failed(&self, error: &CaptureError) -> SessionSnapshot {
        self.inner.events.send(SessionEvent::error(error.to_string()));
        self.dispatch(Transition::PipelineFailed(error.to_string())).await
    }

    /// Clears the pipeline failure after the source restarted.
    pub async fn pipeline_recovered(&self) -> SessionSnapshot {
        self.dispatch(Transition::PipelineRecovered).await
    }

    /// Fetches statistics and applies them.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Sync`] if the service call fails; the session
    /// is left as it was.
    pub async fn reconcile(&self) -> Result<SessionSnapshot> {
        match self.inner.service.stats(&self.inner.family).await {
            Ok(stats) => Ok(self.dispatch(Transition::StatsArrived(stats)).await),
            Err(e) => {
                warn!(error = %e, "Statistics refresh failed");
                Err(CaptureError::Sync(e))
            }
        }
    }

    /// Waits until no effect task is running.
    pub async fn quiesce(&self) {
        let mut tasks = self.inner.tasks.subscribe();
        // the sender lives in `inner`, so this only ends at zero
        let _ = tasks.wait_for(|n| *n == 0).await;
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Applies one transition, publishes the change and starts its effects.
    async fn dispatch(&self, transition: Transition) -> SessionSnapshot {
        let is_prediction = matches!(transition, Transition::PredictionFinished { .. });
        let (snapshot, effects, changed) = {
            let mut session = self.inner.session.lock().await;
            let before = session.revision();
            let effects = session.apply(transition);
            let changed = session.revision() != before;
            (self.decorate(session.snapshot()).await, effects, changed)
        };

        self.inner.collecting.send_if_modified(|collecting| {
            let now = snapshot.collecting;
            std::mem::replace(collecting, now) != now
        });

        if changed {
            self.inner.events.send(SessionEvent::session(snapshot.clone()));
            if is_prediction {
                if let Some(event) = SessionEvent::prediction(&snapshot) {
                    self.inner.events.send(event);
                }
            }
        }

        for effect in effects {
            self.spawn_effect(effect, snapshot.predicting);
        }
        snapshot
    }

    fn spawn_effect(&self, effect: Effect, predicting: bool) {
        let permit = match &effect {
            Effect::Predict { .. } => match self.inner.throttle.try_acquire(predicting) {
                Ok(permit) => Some(permit),
                Err(reason) => {
                    debug!(%reason, "Prediction frame dropped");
                    return;
                }
            },
            _ => None,
        };

        self.inner.tasks.send_modify(|n| *n += 1);
        let guard = TaskGuard(self.inner.tasks.clone());
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.run_effect(effect, permit).await;
        });
    }

    async fn run_effect(&self, effect: Effect, permit: Option<PredictionPermit>) {
        let inner = &self.inner;
        match effect {
            Effect::SubmitSample { label, keypoints } => {
                match inner.service.collect(&inner.family, &label, &keypoints).await {
                    Ok(outcome) if outcome.limit_reached => {
                        debug!(label = %label, "Service reports the class is full");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let error = CaptureError::SampleSubmission(e);
                        warn!(label = %label, error = %error, "Sample not stored");
                    }
                }
                let _ = self.reconcile().await;
            }
            Effect::Predict {
                label,
                keypoints,
                epoch,
            } => {
                let result = inner
                    .service
                    .predict(&inner.family, label.as_ref(), &keypoints)
                    .await;
                drop(permit);
                if let Err(e) = &result {
                    debug!(error = %e, "Prediction request failed");
                }
                self.dispatch(Transition::PredictionFinished { epoch, result })
                    .await;
            }
            Effect::FetchStats => {
                let _ = self.reconcile().await;
            }
            Effect::Train(target) => {
                info!(target = ?target, "Training started");
                let result = inner.service.train(&inner.family, target.label()).await;
                self.dispatch(Transition::TrainingFinished { target, result })
                    .await;
            }
            Effect::RunDestructive(action) => {
                let result = self.run_destructive(&action).await;
                self.dispatch(Transition::DestructiveFinished { action, result })
                    .await;
            }
        }
    }

    /// Issues the calls of `action` in order, stopping at the first failure.
    async fn run_destructive(
        &self,
        action: &DestructiveAction,
    ) -> std::result::Result<(), BackendError> {
        let inner = &self.inner;
        for call in action.calls(&inner.family) {
            let result = match &call {
                BackendCall::DeleteData(label) => {
                    inner.service.delete_data(&inner.family, label).await
                }
                BackendCall::DeleteModel(label) => {
                    inner.service.delete_model(&inner.family, label).await
                }
            };
            if let Err(e) = result {
                warn!(call = ?call, error = %e, "Destructive call failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl<B: TrainingService> FrameSink for Coordinator<B> {
    fn on_overlay(&self, overlay: Overlay) {
        self.inner.events.send(SessionEvent::Overlay(overlay));
    }

    async fn on_frame(&self, frame: LandmarkFrame) {
        self.dispatch(Transition::Frame(frame)).await;
    }

    async fn on_failure(&self, error: CaptureError) {
        self.pipeline_failed(&error).await;
    }
}
