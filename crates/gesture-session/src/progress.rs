//! Per-class sample counters.
//!
//! Counts are bumped optimistically as samples are submitted and replaced
//! whenever an authoritative [`StatsSnapshot`] arrives. With the default
//! [`ReconcilePolicy::ServerWins`] the last response to arrive wins, even if
//! it was requested before a newer optimistic increment.

use gesture_backend::{ClassFamily, ClassLabel, StatsSnapshot};
use serde::{Deserialize, Serialize};

use crate::config::ReconcilePolicy;

/// `min(100, 100 * count / max)`.
#[must_use]
pub fn percentage(count: u32, max: u32) -> f64 {
    if max == 0 {
        return 0.0;
    }
    (100.0 * f64::from(count) / f64::from(max)).min(100.0)
}

/// Progress of one class towards its sample target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerClassProgress {
    /// Class this entry tracks.
    pub label: ClassLabel,
    /// Samples stored, server count or optimistic.
    pub count: u32,
    /// Sample target.
    pub max: u32,
    /// `min(100, 100 * count / max)`.
    pub percentage: f64,
    /// Whether a trained model exists for the class.
    pub has_model: bool,
}

impl PerClassProgress {
    fn empty(label: ClassLabel, max: u32) -> Self {
        Self {
            label,
            count: 0,
            max,
            percentage: 0.0,
            has_model: false,
        }
    }

    fn set_count(&mut self, count: u32) {
        self.count = count;
        self.percentage = percentage(self.count, self.max);
    }

    /// Returns `true` once the target is reached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.percentage >= 100.0
    }
}

/// Sum over every class entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalProgress {
    /// Samples across every class.
    pub samples: u32,
    /// Sum of every class target.
    pub max: u32,
    /// Overall percentage.
    pub percentage: f64,
}

/// Progress of every class in one family, in family order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStore {
    entries: Vec<PerClassProgress>,
    default_max: u32,
}

impl ProgressStore {
    /// Creates zeroed entries for every label of `family`.
    #[must_use]
    pub fn new(family: &ClassFamily, default_max: u32) -> Self {
        let default_max = default_max.max(1);
        Self {
            entries: family
                .labels()
                .iter()
                .map(|label| PerClassProgress::empty(label.clone(), default_max))
                .collect(),
            default_max,
        }
    }

    /// Entries in family order.
    #[must_use]
    pub fn entries(&self) -> &[PerClassProgress] {
        &self.entries
    }

    /// Entry of `label`, if it belongs to the family.
    #[must_use]
    pub fn get(&self, label: &ClassLabel) -> Option<&PerClassProgress> {
        self.entries.iter().find(|e| &e.label == label)
    }

    fn get_mut(&mut self, label: &ClassLabel) -> Option<&mut PerClassProgress> {
        self.entries.iter_mut().find(|e| &e.label == label)
    }

    /// Percentage of `label`, or 0 for labels outside the family.
    #[must_use]
    pub fn percentage(&self, label: &ClassLabel) -> f64 {
        self.get(label).map_or(0.0, |e| e.percentage)
    }

    /// Returns `true` if `label` reached its target.
    #[must_use]
    pub fn is_complete(&self, label: &ClassLabel) -> bool {
        self.get(label).is_some_and(PerClassProgress::is_complete)
    }

    /// Records one optimistic sample and returns the new percentage.
    pub fn increment(&mut self, label: &ClassLabel) -> Option<f64> {
        let entry = self.get_mut(label)?;
        entry.set_count(entry.count.saturating_add(1));
        Some(entry.percentage)
    }

    /// Replaces local entries with an authoritative snapshot.
    ///
    /// Labels missing from the snapshot drop to zero; labels outside the
    /// family are ignored. Under
    /// [`ReconcilePolicy::KeepOptimisticWhileCollecting`] the count of
    /// `collecting` never goes down.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &StatsSnapshot,
        collecting: Option<&ClassLabel>,
        policy: ReconcilePolicy,
    ) {
        let default_max = self.default_max;
        for entry in &mut self.entries {
            let local_count = entry.count;
            let (count, max, has_model) = snapshot.get(entry.label.as_str()).map_or(
                (0, default_max, false),
                |stats| {
                    (
                        stats.total_samples,
                        stats.recommended_max.filter(|m| *m > 0).unwrap_or(default_max),
                        stats.has_model,
                    )
                },
            );
            let keep_local = policy == ReconcilePolicy::KeepOptimisticWhileCollecting
                && collecting == Some(&entry.label);

            entry.max = max;
            entry.has_model = has_model;
            entry.set_count(if keep_local { count.max(local_count) } else { count });
        }
    }

    /// Zeroes every entry and forgets model flags.
    pub fn clear_all(&mut self) {
        for entry in &mut self.entries {
            entry.set_count(0);
            entry.has_model = false;
        }
    }

    /// Zeroes one entry and forgets its model flag.
    pub fn clear(&mut self, label: &ClassLabel) {
        if let Some(entry) = self.get_mut(label) {
            entry.set_count(0);
            entry.has_model = false;
        }
    }

    /// Sums every entry, saturating at `u32::MAX`.
    #[must_use]
    pub fn total(&self) -> TotalProgress {
        let samples = self.entries.iter().map(|e| e.count).fold(0, u32::saturating_add);
        let max = self.entries.iter().map(|e| e.max).fold(0, u32::saturating_add);
        TotalProgress {
            samples,
            max,
            percentage: percentage(samples, max),
        }
    }

    /// Zeroes one entry's samples; its model flag stays.
    pub fn clear_samples(&mut self, label: &ClassLabel) {
        if let Some(entry) = self.get_mut(label) {
            entry.set_count(0);
        }
    }

    /// Labels among `labels` with fewer than `min` samples.
    #[must_use]
    pub fn insufficient_for_training(&self, labels: &[ClassLabel], min: u32) -> Vec<ClassLabel> {
        labels
            .iter()
            .filter(|label| self.get(label).map_or(0, |e| e.count) < min)
            .cloned()
            .collect()
    }

    /// Returns `true` if every class reached its target.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(PerClassProgress::is_complete)
    }

    /// Returns `true` if any class has a trained model.
    #[must_use]
    pub fn any_model(&self) -> bool {
        self.entries.iter().any(|e| e.has_model)
    }
}
