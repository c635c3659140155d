//! Landmark source adapter.
//!
//! A [`FrameLoop`] pulls detections from a [`LandmarkDetector`] at the
//! detector's own cadence, publishes an [`Overlay`] for every detection and
//! hands at most one hand per detection to a [`FrameSink`], waiting for the
//! sink before pulling the next one.
//!
//! Stopping is cooperative: the handle clears a liveness flag that the loop
//! checks before every detector call and again before every sink call, so no
//! frame is delivered once teardown has begun.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};
use crate::landmarks::LandmarkFrame;
use crate::overlay::Overlay;

/// Everything the detector found in one video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Frame width in pixels.
    pub frame_width: u32,
    /// Frame height in pixels.
    pub frame_height: u32,
    /// Detected hands, in detector order.
    pub hands: Vec<LandmarkFrame>,
}

/// Producer of per-frame hand landmarks.
pub trait LandmarkDetector: Send + 'static {
    /// Acquires the camera and loads the detection model.
    ///
    /// Must succeed after a previous `release`, regardless of earlier failures.
    fn initialize(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Waits for the next processed frame. `Ok(None)` means the source ended.
    fn next_detection(&mut self) -> impl Future<Output = Result<Option<Detection>>> + Send;

    /// Releases the camera. Safe to call more than once.
    fn release(&mut self) -> impl Future<Output = ()> + Send;
}

/// Consumer of the frame loop's output.
pub trait FrameSink: Send + Sync + 'static {
    /// Receives the overlay of every processed frame.
    fn on_overlay(&self, overlay: Overlay);

    /// Receives the first detected hand of a frame.
    fn on_frame(&self, frame: LandmarkFrame) -> impl Future<Output = ()> + Send;

    /// Receives the error that stopped the loop.
    fn on_failure(&self, error: CaptureError) -> impl Future<Output = ()> + Send;
}

/// Returned when a detector fails to initialize; gives the detector back so
/// the caller can retry later.
#[derive(Debug)]
pub struct StartFailure<D> {
    /// Why initialization failed.
    pub error: CaptureError,
    /// The released detector.
    pub detector: D,
}

/// Drives a detector into a sink.
pub struct FrameLoop;

impl FrameLoop {
    /// Initializes `detector` and spawns the loop.
    ///
    /// # Errors
    ///
    /// Returns the initialization error together with the released detector.
    pub async fn start<D, S>(
        mut detector: D,
        sink: Arc<S>,
        max_hands: usize,
    ) -> std::result::Result<FrameLoopHandle<D>, StartFailure<D>>
    where
        D: LandmarkDetector,
        S: FrameSink,
    {
        if let Err(error) = detector.initialize().await {
            warn!(error = %error, "Landmark detector failed to initialize");
            detector.release().await;
            return Err(StartFailure { error, detector });
        }
        info!(max_hands, "Landmark detector ready");

        let alive = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(Notify::new());
        let (done_tx, done) = watch::channel(false);
        let task = tokio::spawn(run(
            detector,
            sink,
            max_hands.max(1),
            Arc::clone(&alive),
            Arc::clone(&stop),
            done_tx,
        ));

        Ok(FrameLoopHandle {
            alive,
            stop,
            done,
            task: Some(task),
        })
    }
}

async fn run<D, S>(
    mut detector: D,
    sink: Arc<S>,
    max_hands: usize,
    alive: Arc<AtomicBool>,
    stop: Arc<Notify>,
    done: watch::Sender<bool>,
) -> D
where
    D: LandmarkDetector,
    S: FrameSink,
{
    let mut frames: u64 = 0;
    while alive.load(Ordering::Acquire) {
        let next = tokio::select! {
            () = stop.notified() => break,
            next = detector.next_detection() => next,
        };

        match next {
            Ok(Some(detection)) => {
                let mut hands = detection.hands;
                hands.truncate(max_hands);
                sink.on_overlay(Overlay::render(
                    detection.frame_width,
                    detection.frame_height,
                    &hands,
                ));

                let Some(hand) = hands.into_iter().next() else {
                    continue;
                };
                if !alive.load(Ordering::Acquire) {
                    break;
                }
                frames += 1;
                sink.on_frame(hand).await;
            }
            Ok(None) => {
                info!(frames, "Landmark source ended");
                break;
            }
            Err(error) => {
                warn!(error = %error, frames, "Landmark source failed");
                alive.store(false, Ordering::Release);
                sink.on_failure(error).await;
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
    detector.release().await;
    debug!(frames, "Landmark detector released");
    done.send_replace(true);
    detector
}

/// Controls a running [`FrameLoop`]. Dropping the handle stops the loop.
#[derive(Debug)]
pub struct FrameLoopHandle<D> {
    alive: Arc<AtomicBool>,
    stop: Arc<Notify>,
    done: watch::Receiver<bool>,
    task: Option<JoinHandle<D>>,
}

impl<D> FrameLoopHandle<D> {
    /// Begins teardown. Idempotent; no frame is delivered after this returns.
    pub fn stop(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.stop.notify_one();
        }
    }

    /// Returns `true` until the loop stops or its source ends.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::Acquire)
            && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Waits for the loop to finish and returns the released detector.
    pub async fn join(mut self) -> Option<D> {
        let task = self.task.take()?;
        match task.await {
            Ok(detector) => Some(detector),
            Err(e) => {
                warn!(error = %e, "Frame loop task did not finish cleanly");
                None
            }
        }
    }

    /// Waits until the loop has ended and released its detector, whether it
    /// was stopped, its source ended or it failed.
    pub async fn finished(&mut self) {
        // a dropped sender means the task is gone as well
        let _ = self.done.wait_for(|done| *done).await;
    }
}

impl<D> Drop for FrameLoopHandle<D> {
    fn drop(&mut self) {
        self.stop();
    }
}
