//! Admission control for prediction requests.
//!
//! At most one request is in flight, and accepted requests are at least
//! `min_interval` apart. Rejected frames are simply dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Why a frame was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttled {
    /// Prediction is off.
    NotPredicting,
    /// A request is still awaiting its response.
    InFlight,
    /// The minimum interval has not elapsed.
    TooSoon,
}

impl std::fmt::Display for Throttled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotPredicting => write!(f, "not predicting"),
            Self::InFlight => write!(f, "request in flight"),
            Self::TooSoon => write!(f, "too soon"),
        }
    }
}

/// Marker for "nothing accepted yet".
const NEVER: u64 = u64::MAX;

/// Gate between predicting frames and the inference endpoint.
#[derive(Debug)]
pub struct PredictionThrottle {
    min_interval: Duration,
    origin: Instant,
    last_accepted_ms: AtomicU64,
    in_flight: Arc<AtomicBool>,
}

/// Proof of admission. Dropping it clears the in-flight flag, whatever the
/// outcome of the request.
#[derive(Debug)]
#[must_use = "the in-flight slot is released as soon as the permit is dropped"]
pub struct PredictionPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for PredictionPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl PredictionThrottle {
    /// Creates a throttle admitting one frame per `min_interval`.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            origin: Instant::now(),
            last_accepted_ms: AtomicU64::new(NEVER),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Admits a frame if predicting, nothing is in flight and the interval
    /// since the last accepted frame has elapsed.
    ///
    /// # Errors
    ///
    /// Returns the reason the frame was dropped.
    pub fn try_acquire(&self, predicting: bool) -> Result<PredictionPermit, Throttled> {
        self.try_acquire_at(predicting, Instant::now())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn try_acquire_at(&self, predicting: bool, now: Instant) -> Result<PredictionPermit, Throttled> {
        if !predicting {
            return Err(Throttled::NotPredicting);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Throttled::InFlight);
        }
        let permit = PredictionPermit {
            in_flight: Arc::clone(&self.in_flight),
        };

        let now_ms = now.saturating_duration_since(self.origin).as_millis() as u64;
        let last = self.last_accepted_ms.load(Ordering::Acquire);
        let min_ms = self.min_interval.as_millis() as u64;
        if last != NEVER && now_ms.saturating_sub(last) < min_ms {
            // dropping the permit releases the slot
            return Err(Throttled::TooSoon);
        }
        self.last_accepted_ms.store(now_ms, Ordering::Release);
        Ok(permit)
    }

    /// Returns `true` while a permit is held.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Minimum spacing between admitted frames.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
