//! Integration tests for the HTTP training service client.
//!
//! Each test runs the client against an in-process service that speaks the
//! real wire format.

mod common;

use std::time::Duration;

use common::{hand, FakeService, FakeState};
use gesture_backend::{
    BackendError, ClassFamily, ClassLabel, FamilyId, HttpTrainingService, ServiceErrorKind,
    TrainingService,
};

fn client(service: &FakeService) -> HttpTrainingService {
    HttpTrainingService::new(&service.base_url, Duration::from_secs(5))
        .expect("Failed to build client")
}

fn vowels() -> ClassFamily {
    ClassFamily::new(FamilyId::Vowels)
}

#[tokio::test]
async fn test_health_check() {
    let service = FakeService::spawn().await;
    client(&service)
        .health_check()
        .await
        .expect("Health check should pass");
}

#[tokio::test]
async fn test_health_check_fails_when_unreachable() {
    let port = common::find_available_port();
    let client = HttpTrainingService::new(
        format!("http://127.0.0.1:{port}/api"),
        Duration::from_secs(2),
    )
    .expect("Failed to build client");

    let err = client.health_check().await.unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_collect_counts_samples_until_the_limit() {
    let service = FakeService::spawn_with(FakeState {
        max: 2,
        ..FakeState::default()
    })
    .await;
    let client = client(&service);
    let family = vowels();
    let label = ClassLabel::new("a");

    let first = client.collect(&family, &label, &hand()).await.unwrap();
    assert!(!first.limit_reached);
    assert_eq!(first.total_samples, Some(1));

    client.collect(&family, &label, &hand()).await.unwrap();
    let full = client.collect(&family, &label, &hand()).await.unwrap();
    assert!(full.limit_reached);
    assert_eq!(full.total_samples, Some(2));
    assert_eq!(service.count("a"), 2);
    assert_eq!(service.requests_matching("POST vocales/recolectar/a"), 3);
}

#[tokio::test]
async fn test_collect_rejects_short_keypoints() {
    let service = FakeService::spawn().await;
    let err = client(&service)
        .collect(&vowels(), &ClassLabel::new("a"), &hand()[..20])
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(422));
    assert!(err.to_string().contains("21 puntos clave"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_stats_current_shape() {
    let service = FakeService::spawn_with(FakeState {
        max: 50,
        ..FakeState::default()
    })
    .await;
    service.set_count("a", 10);
    service.set_count("E", 50);

    let stats = client(&service).stats(&vowels()).await.unwrap();
    let a = stats.get("a").expect("a should be reported");
    assert_eq!(a.total_samples, 10);
    assert_eq!(a.recommended_max, Some(50));
    assert!(!a.has_model);
    // Labels are normalized to lowercase
    assert_eq!(stats.get("e").map(|e| e.total_samples), Some(50));
    assert!(!stats.any_model());
}

#[tokio::test]
async fn test_stats_legacy_shape() {
    let service = FakeService::spawn_with(FakeState {
        legacy_stats: true,
        max: 30,
        ..FakeState::default()
    })
    .await;
    service.set_count("u", 7);

    let stats = client(&service).stats(&vowels()).await.unwrap();
    let u = stats.get("u").expect("u should be reported");
    assert_eq!(u.total_samples, 7);
    assert_eq!(u.recommended_max, Some(30));
}

#[tokio::test]
async fn test_predict_without_model_is_classified() {
    let service = FakeService::spawn().await;
    let err = client(&service)
        .predict(&vowels(), None, &hand())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(err.kind(), ServiceErrorKind::ModelNotTrained);
}

#[tokio::test]
async fn test_train_then_predict() {
    let service = FakeService::spawn().await;
    service.set_count("a", 3);
    let client = client(&service);
    let family = vowels();
    let label = ClassLabel::new("a");

    let outcome = client.train(&family, Some(&label)).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.accuracy, Some(0.97));
    assert_eq!(outcome.epochs, Some(40));

    let prediction = client.predict(&family, Some(&label), &hand()).await.unwrap();
    assert_eq!(prediction.predicted_class.as_deref(), Some("a"));
    assert!((prediction.confidence - 0.91).abs() < 1e-9);
    assert_eq!(prediction.all_probabilities.len(), 1);
    assert_eq!(service.requests_matching("POST vocales/prediccion/a"), 1);

    let stats = client.stats(&family).await.unwrap();
    assert!(stats.get("a").unwrap().has_model);
}

#[tokio::test]
async fn test_train_family_with_insufficient_data() {
    let service = FakeService::spawn().await;
    service.set_count("a", 5);
    service.set_count("e", 1);

    let err = client(&service).train(&vowels(), None).await.unwrap_err();
    assert_eq!(err.kind(), ServiceErrorKind::InsufficientData);
    assert_eq!(service.requests_matching("POST vocales/entrenar/-"), 1);
}

#[tokio::test]
async fn test_delete_model_that_does_not_exist_succeeds() {
    let service = FakeService::spawn().await;
    let client = client(&service);
    let family = vowels();
    let label = ClassLabel::new("o");

    client.delete_model(&family, &label).await.unwrap();
    assert_eq!(service.requests_matching("DELETE vocales/modelo/o"), 1);
}

#[tokio::test]
async fn test_delete_data_zeroes_the_class() {
    let service = FakeService::spawn().await;
    service.set_count("i", 12);

    client(&service)
        .delete_data(&vowels(), &ClassLabel::new("i"))
        .await
        .unwrap();
    assert_eq!(service.count("i"), 0);
}
