use std::time::Duration;

use herald_core::error::AppError;
use herald_core::models::{
    AttemptMetrics, EngineEvent, FetchMethod, SourceFilter, SourceRecord, SourceType,
};
use herald_core::traits::SourceStore;

use crate::integration::common::setup_test_db;

fn source(id: &str) -> SourceRecord {
    SourceRecord::new(id, id.to_uppercase(), format!("https://{id}.example"), SourceType::Regional)
        .with_credibility(80.0)
}

#[tokio::test]
async fn upsert_and_get_source() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo();

    repo.upsert(&source("gazette").with_regions(["north"]).restricted())
        .await
        .unwrap();

    let stored = repo.get("gazette").await.unwrap().expect("source exists");
    assert_eq!(stored.name, "GAZETTE");
    assert_eq!(stored.source_type, SourceType::Regional);
    assert_eq!(stored.credibility_score, 80.0);
    assert_eq!(stored.success_rate, 100.0);
    assert_eq!(stored.avg_response_ms, None);
    assert_eq!(stored.regions, vec!["north".to_string()]);
    assert!(stored.restricted);
    assert!(repo.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn list_active_applies_filter() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo();

    repo.upsert(&source("north").with_regions(["North"])).await.unwrap();
    repo.upsert(&source("south").with_regions(["south"])).await.unwrap();
    repo.upsert(&source("anywhere")).await.unwrap();
    repo.upsert(&source("retired").inactive()).await.unwrap();

    let north = repo
        .list_active_sources(&SourceFilter::new(Some("north".into()), None))
        .await
        .unwrap();
    let ids: Vec<_> = north.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["anywhere", "north"]);

    let all = repo.list_active_sources(&SourceFilter::any()).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn record_attempt_updates_rolling_stats() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo();
    repo.upsert(&source("gazette")).await.unwrap();

    let ok = AttemptMetrics::success("gazette", FetchMethod::Direct, Duration::from_millis(400));
    SourceStore::record_attempt(&repo, &ok).await.unwrap();
    let failed = AttemptMetrics::failure("gazette", Duration::from_millis(800));
    SourceStore::record_attempt(&repo, &failed).await.unwrap();

    let stored = repo.get("gazette").await.unwrap().unwrap();
    assert_eq!(stored.total_attempts, 2);
    assert_eq!(stored.avg_response_ms, Some(600.0));
    assert_eq!(stored.success_rate, 50.0);
    assert!(stored.last_attempt_at.is_some());

    // Matches the in-memory rolling update.
    let mut expected = source("gazette");
    expected.apply_attempt(&ok);
    expected.apply_attempt(&failed);
    assert_eq!(expected.success_rate, stored.success_rate);
    assert_eq!(expected.avg_response_ms, stored.avg_response_ms);
}

#[tokio::test]
async fn record_attempt_for_unknown_source_fails() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo();

    let err = SourceStore::record_attempt(
        &repo,
        &AttemptMetrics::failure("ghost", Duration::from_millis(10)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Generic(_)));
}

#[tokio::test]
async fn events_are_logged_newest_first() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo();

    let first = EngineEvent::from_error(Some("gazette"), &AppError::Timeout(15));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = EngineEvent::from_error(None, &AppError::AllSourcesExhausted);
    repo.log_event(&first).await.unwrap();
    repo.log_event(&second).await.unwrap();
    // Logging the same event twice is a no-op.
    repo.log_event(&second).await.unwrap();

    let events = repo.recent_events(10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, second.id);
    assert_eq!(events[0].kind, "all_sources_exhausted");
    assert_eq!(events[0].source_id, None);
    assert_eq!(events[1].kind, "timeout");
    assert_eq!(events[1].source_id.as_deref(), Some("gazette"));
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db().await;
    db.health_check().await.unwrap();
}
