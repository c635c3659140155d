//! End-to-end capture flows: a replayed recording feeds the coordinator,
//! which talks to the training service over HTTP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, write_recording, FakeService, FakeState};
use gesture_backend::HttpTrainingService;
use gesture_session::{
    Config, Coordinator, FrameLoop, ReplayDetector, SessionEvent, SessionMode, SyncIntervals,
    SyncScheduler,
};

const SAMPLES: u32 = 5;
const WAIT: Duration = Duration::from_secs(10);

async fn setup() -> (FakeService, Coordinator<HttpTrainingService>) {
    let service = FakeService::spawn_with(FakeState {
        max: SAMPLES,
        ..FakeState::default()
    })
    .await;
    let config = Config {
        samples_per_class: SAMPLES,
        ..service.config()
    };
    let client = HttpTrainingService::new(&config.backend_url, config.request_timeout())
        .expect("Failed to build client");
    (service, Coordinator::new(client, &config))
}

fn replay(name: &str, frames: usize) -> ReplayDetector {
    ReplayDetector::new(write_recording(name, frames))
        .with_fps(50)
        .with_looping(true)
}

#[tokio::test]
async fn test_collection_stops_when_the_class_is_full() {
    let (service, coordinator) = setup().await;
    let handle = FrameLoop::start(
        replay("gesture-collect.jsonl", 3),
        Arc::new(coordinator.clone()),
        1,
    )
    .await
    .expect("Replay should start");

    let snapshot = coordinator.start_collecting("a").await.unwrap();
    assert_eq!(snapshot.mode, SessionMode::Collecting);

    let done = wait_until(&coordinator, WAIT, |s| s.mode == SessionMode::Idle).await;
    assert!(done, "collection should stop at {SAMPLES} samples");

    handle.stop();
    handle.join().await;
    coordinator.quiesce().await;
    coordinator.reconcile().await.unwrap();

    assert_eq!(service.count("a"), SAMPLES);
    let snapshot = coordinator.snapshot().await;
    let a = snapshot.class("a").unwrap();
    assert_eq!(a.count, SAMPLES);
    assert_eq!(a.max, SAMPLES);
    assert!(a.is_complete());
    assert_eq!(snapshot.total.samples, SAMPLES);
}

#[tokio::test]
async fn test_train_then_predict_from_replay() {
    let (service, coordinator) = setup().await;
    service.set_count("a", SAMPLES);
    coordinator.reconcile().await.unwrap();

    let mut events = coordinator.subscribe();
    let snapshot = coordinator.train(Some("a")).await.unwrap();
    assert!(snapshot.training);

    let trained = wait_until(&coordinator, WAIT, |s| s.model_trained).await;
    assert!(trained, "training should finish");
    assert_eq!(service.requests_matching("POST vocales/entrenar/a"), 1);
    assert_eq!(coordinator.snapshot().await.training_accuracy, Some(0.97));

    let snapshot = coordinator.toggle_prediction().await;
    assert_eq!(snapshot.mode, SessionMode::Predicting);

    let handle = FrameLoop::start(
        replay("gesture-predict.jsonl", 2),
        Arc::new(coordinator.clone()),
        1,
    )
    .await
    .expect("Replay should start");

    let predicted =
        wait_until(&coordinator, WAIT, |s| s.prediction.as_deref() == Some("a")).await;
    assert!(predicted, "a prediction should arrive");

    // Let a few more frames through the throttle
    tokio::time::sleep(Duration::from_millis(700)).await;
    handle.stop();
    handle.join().await;
    coordinator.quiesce().await;

    let times = service.state.lock().unwrap().predict_times.clone();
    assert!(!times.is_empty());
    for pair in times.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_millis(150),
            "prediction requests should be throttled"
        );
    }
    // Inference targets the class trained last
    assert_eq!(
        service.requests_matching("POST vocales/prediccion/a"),
        times.len()
    );

    let mut saw_prediction = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Prediction(prediction) = event {
            assert_eq!(prediction.label, "a");
            saw_prediction = true;
        }
    }
    assert!(saw_prediction, "observers should see the prediction");
}

#[tokio::test]
async fn test_training_rejected_by_the_service() {
    let (service, coordinator) = setup().await;
    // Enough locally, but the service stored fewer than it needs
    service.set_count("e", SAMPLES);
    coordinator.reconcile().await.unwrap();
    service.set_count("e", 1);

    coordinator.train(Some("e")).await.unwrap();
    let finished = wait_until(&coordinator, WAIT, |s| !s.training).await;
    assert!(finished);
    coordinator.quiesce().await;

    let snapshot = coordinator.snapshot().await;
    assert!(!snapshot.model_trained);
    assert_eq!(snapshot.class("e").unwrap().count, 1);
}

#[tokio::test]
async fn test_missing_recording_marks_the_pipeline_down() {
    let (_service, coordinator) = setup().await;
    let missing = std::env::temp_dir().join("gesture-missing-recording.jsonl");
    let _ = std::fs::remove_file(&missing);

    let failure = match FrameLoop::start(
        ReplayDetector::new(missing),
        Arc::new(coordinator.clone()),
        1,
    )
    .await
    {
        Ok(_) => panic!("a missing recording must not start"),
        Err(failure) => failure,
    };
    let snapshot = coordinator.pipeline_failed(&failure.error).await;
    assert!(snapshot.pipeline_error.is_some());

    // Collection is refused until the pipeline recovers
    let snapshot = coordinator.start_collecting("a").await.unwrap();
    assert_eq!(snapshot.mode, SessionMode::Idle);

    coordinator.pipeline_recovered().await;
    let snapshot = coordinator.start_collecting("a").await.unwrap();
    assert_eq!(snapshot.mode, SessionMode::Collecting);
}

#[tokio::test]
async fn test_scheduler_keeps_progress_in_step() {
    let (service, coordinator) = setup().await;
    let sync = SyncScheduler::spawn(
        coordinator.clone(),
        SyncIntervals {
            collecting: Duration::from_millis(50),
            idle: Duration::from_millis(100),
        },
    );

    service.set_count("o", 3);
    let seen = wait_until(&coordinator, WAIT, |s| {
        s.class("o").is_some_and(|o| o.count == 3)
    })
    .await;
    assert!(seen, "the scheduler should pick up server counts");

    sync.join().await;
    let polls = service.requests_matching("GET vocales/estadisticas");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        service.requests_matching("GET vocales/estadisticas"),
        polls,
        "no polls after the scheduler stops"
    );
}
