//! Operator-facing status lines.

use gesture_backend::{ClassLabel, FamilyId};

pub(crate) fn idle(family: FamilyId) -> String {
    format!("Idle. Pick a {} to start collecting.", family.noun())
}

pub(crate) fn collecting(family: FamilyId, label: &ClassLabel) -> String {
    format!(
        "Collecting samples for {} '{}'.",
        family.noun(),
        label.symbol()
    )
}

pub(crate) fn collection_complete(family: FamilyId, label: &ClassLabel, max: u32) -> String {
    format!(
        "Collection for {} '{}' is complete ({max} samples). Stopped collecting.",
        family.noun(),
        label.symbol()
    )
}

pub(crate) fn already_complete(family: FamilyId, label: &ClassLabel) -> String {
    format!(
        "{} '{}' already has all its samples.",
        capitalize(family.noun()),
        label.symbol()
    )
}

pub(crate) const TRAINING: &str = "Training model... this can take a few minutes.";

pub(crate) const TRAINING_BUSY: &str = "A training run is already in progress.";

/// Accuracy may arrive as a fraction or as a percentage.
pub(crate) fn training_success(accuracy: Option<f64>) -> String {
    match accuracy {
        Some(acc) => format!("Training complete! Accuracy: {:.1}%", display_accuracy(acc)),
        None => "Training complete!".to_string(),
    }
}

/// Scales fractional accuracies to a percentage.
#[must_use]
pub fn display_accuracy(accuracy: f64) -> f64 {
    if accuracy <= 1.0 {
        accuracy * 100.0
    } else {
        accuracy
    }
}

pub(crate) const TRAINING_ERROR: &str = "Training failed. Check the logs for details.";

pub(crate) const TRAINING_INSUFFICIENT_DATA: &str =
    "Not enough samples to train. Collect more data and try again.";

pub(crate) fn training_insufficient_classes(labels: &[ClassLabel], min: u32) -> String {
    let names: Vec<&str> = labels.iter().map(ClassLabel::symbol).collect();
    format!(
        "Need at least {min} samples per class before training. Insufficient: {}",
        names.join(", ")
    )
}

pub(crate) const RESET: &str = "Data reset.";

pub(crate) const DELETING: &str = "Removing data...";

pub(crate) fn class_reset(family: FamilyId, label: &ClassLabel) -> String {
    format!(
        "Data and model for {} '{}' were removed.",
        family.noun(),
        label.symbol()
    )
}

pub(crate) fn class_deleted(family: FamilyId, label: &ClassLabel) -> String {
    format!(
        "Samples for {} '{}' were deleted.",
        family.noun(),
        label.symbol()
    )
}

pub(crate) const DESTRUCTIVE_FAILED: &str = "Could not remove the data. Check the logs.";

pub(crate) const READY_TO_TRAIN: &str = "Collection complete. Ready to train the model.";

pub(crate) const PREDICTING: &str = "Predicting. Show a gesture to the camera.";

pub(crate) const PREDICTION_ERROR: &str =
    "Prediction failed. Make sure the model is trained.";

pub(crate) const PREDICTION_NO_MODEL: &str = "No trained model yet. Train the model first.";

pub(crate) const BUSY_TRAINING: &str = "Wait for training to finish.";

pub(crate) fn pipeline_error(message: &str) -> String {
    format!("Camera or detector failure: {message}")
}

pub(crate) fn confirm_reset_family(family: FamilyId) -> String {
    format!(
        "Delete every sample and the trained model for all {} classes? This cannot be undone.",
        family.noun()
    )
}

pub(crate) fn confirm_reset_class(family: FamilyId, label: &ClassLabel) -> String {
    format!(
        "Delete the samples and model for {} '{}'? This cannot be undone.",
        family.noun(),
        label.symbol()
    )
}

pub(crate) fn confirm_delete_class(family: FamilyId, label: &ClassLabel) -> String {
    format!(
        "Delete every sample of {} '{}'? This cannot be undone.",
        family.noun(),
        label.symbol()
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
