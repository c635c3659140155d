//! Landmark pipeline supervision.
//!
//! The pipeline runs until shutdown. Whenever the frame loop fails to start
//! or stops on its own, the supervisor keeps the detector and waits for a
//! `restart` request from the console.

use std::sync::Arc;

use gesture_backend::TrainingService;
use gesture_session::{Coordinator, FrameLoop, LandmarkDetector};
use tokio::sync::{mpsc, watch};

/// Why the supervisor woke up while the loop was running.
enum Wake {
    Finished,
    Restart,
    Stop,
}

/// Runs `detector` into `coordinator`, restarting it on request, until
/// `stop` turns true.
pub async fn supervise<D, B>(
    detector: D,
    coordinator: Coordinator<B>,
    max_hands: usize,
    mut restart: mpsc::Receiver<()>,
    mut stop: watch::Receiver<bool>,
) where
    D: LandmarkDetector,
    B: TrainingService,
{
    let sink = Arc::new(coordinator.clone());
    let mut detector = detector;
    loop {
        let mut handle = match FrameLoop::start(detector, Arc::clone(&sink), max_hands).await {
            Ok(handle) => handle,
            Err(failure) => {
                eprintln!("{}", failure.error);
                eprintln!("Type 'restart' to try again");
                coordinator.pipeline_failed(&failure.error).await;
                detector = failure.detector;
                if wait_for_restart(&mut restart, &mut stop).await {
                    continue;
                }
                return;
            }
        };
        coordinator.pipeline_recovered().await;

        let wake = tokio::select! {
            () = handle.finished() => Wake::Finished,
            Some(()) = restart.recv() => Wake::Restart,
            _ = stop.wait_for(|stop| *stop) => Wake::Stop,
        };
        match wake {
            Wake::Stop => {
                handle.stop();
                handle.join().await;
                return;
            }
            Wake::Restart => {
                tracing::info!("Restarting landmark pipeline");
                handle.stop();
            }
            Wake::Finished => tracing::info!("Landmark source finished"),
        }

        let Some(released) = handle.join().await else {
            tracing::warn!("Landmark detector was lost, restart is unavailable");
            return;
        };
        detector = released;
        if matches!(wake, Wake::Finished) && !wait_for_restart(&mut restart, &mut stop).await {
            return;
        }
    }
}

/// Returns `true` on a restart request, `false` on shutdown.
async fn wait_for_restart(
    restart: &mut mpsc::Receiver<()>,
    stop: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        Some(()) = restart.recv() => true,
        _ = stop.wait_for(|stop| *stop) => false,
    }
}
