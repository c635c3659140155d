//! The seam between the capture session and whatever stores and trains.

use std::future::Future;

use crate::{
    family::{ClassFamily, ClassLabel},
    stats::StatsSnapshot,
    wire::{CollectOutcome, Prediction, TrainOutcome},
    Result,
};

/// Remote storage, training and inference for gesture classes.
///
/// Every call names the family it targets; implementations must be cheap to
/// share across tasks.
pub trait TrainingService: Send + Sync + 'static {
    /// Fetches per-class statistics for `family`.
    fn stats(&self, family: &ClassFamily) -> impl Future<Output = Result<StatsSnapshot>> + Send;

    /// Stores one labeled sample.
    fn collect(
        &self,
        family: &ClassFamily,
        label: &ClassLabel,
        keypoints: &[[f32; 3]],
    ) -> impl Future<Output = Result<CollectOutcome>> + Send;

    /// Classifies one frame. `None` lets the service choose among every
    /// trained class.
    fn predict(
        &self,
        family: &ClassFamily,
        label: Option<&ClassLabel>,
        keypoints: &[[f32; 3]],
    ) -> impl Future<Output = Result<Prediction>> + Send;

    /// Trains one class, or the whole family when `label` is `None`.
    fn train(
        &self,
        family: &ClassFamily,
        label: Option<&ClassLabel>,
    ) -> impl Future<Output = Result<TrainOutcome>> + Send;

    /// Deletes every stored sample of `label`.
    fn delete_data(
        &self,
        family: &ClassFamily,
        label: &ClassLabel,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Deletes the trained model of `label`.
    fn delete_model(
        &self,
        family: &ClassFamily,
        label: &ClassLabel,
    ) -> impl Future<Output = Result<()>> + Send;
}
