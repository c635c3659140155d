//! Confirmation gate for destructive actions.
//!
//! A reset or delete request only records what would happen. Nothing reaches
//! the training service until the operator confirms; cancelling discards the
//! request without side effects.

use chrono::{DateTime, Utc};
use gesture_backend::{ClassFamily, ClassLabel};
use serde::{Deserialize, Serialize};

/// A deletion the operator may confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum DestructiveAction {
    /// Delete every sample and model of the family.
    ResetFamily,
    /// Delete the samples and model of one class.
    ResetClass(ClassLabel),
    /// Delete the samples of one class, keeping its model.
    DeleteClassData(ClassLabel),
}

/// One training service call issued by a confirmed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// Delete the stored samples of a class.
    DeleteData(ClassLabel),
    /// Delete the trained model of a class.
    DeleteModel(ClassLabel),
}

impl DestructiveAction {
    /// Service calls to issue, in order.
    #[must_use]
    pub fn calls(&self, family: &ClassFamily) -> Vec<BackendCall> {
        match self {
            Self::ResetFamily => family
                .labels()
                .iter()
                .flat_map(|label| {
                    [
                        BackendCall::DeleteData(label.clone()),
                        BackendCall::DeleteModel(label.clone()),
                    ]
                })
                .collect(),
            Self::ResetClass(label) => vec![
                BackendCall::DeleteData(label.clone()),
                BackendCall::DeleteModel(label.clone()),
            ],
            Self::DeleteClassData(label) => vec![BackendCall::DeleteData(label.clone())],
        }
    }
}

/// A destructive action awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDestructiveAction {
    /// Question shown to the operator.
    pub message: String,
    /// What runs on confirmation.
    pub action: DestructiveAction,
    /// When the confirmation was requested.
    pub requested_at: DateTime<Utc>,
}

/// Holds at most one pending action.
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    pending: Option<PendingDestructiveAction>,
}

impl ConfirmationGate {
    /// Creates an empty gate.
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Records `action`, replacing any earlier undecided request.
    pub fn request(
        &mut self,
        action: DestructiveAction,
        message: impl Into<String>,
    ) -> PendingDestructiveAction {
        let pending = PendingDestructiveAction {
            message: message.into(),
            action,
            requested_at: Utc::now(),
        };
        self.pending = Some(pending.clone());
        pending
    }

    /// The undecided action, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<&PendingDestructiveAction> {
        self.pending.as_ref()
    }

    /// Takes the pending action for execution.
    pub fn confirm(&mut self) -> Option<DestructiveAction> {
        self.pending.take().map(|p| p.action)
    }

    /// Discards the pending action.
    pub fn cancel(&mut self) -> Option<PendingDestructiveAction> {
        self.pending.take()
    }
}
