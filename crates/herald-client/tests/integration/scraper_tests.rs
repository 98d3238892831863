use herald_client::MarkdownParser;
use herald_core::config::EngineConfig;
use herald_core::models::{ContentKind, FetchMethod, SourceRecord, SourceType, Tier};
use herald_core::scraper::{ResilientScraper, ScrapeRequest};
use herald_core::store::MemorySourceStore;

use crate::integration::common::{fast_fetcher, spawn_origin};

#[tokio::test]
async fn scrape_falls_back_across_live_sources() {
    let origin = spawn_origin().await;
    let store = MemorySourceStore::new(vec![
        SourceRecord::new("overloaded", "Overloaded", origin.url("/overloaded"), SourceType::Regional)
            .with_credibility(100.0)
            .with_regions(["north"]),
        SourceRecord::new("ok", "Working", origin.url("/ok"), SourceType::Regional)
            .with_credibility(90.0)
            .with_regions(["north"]),
    ]);
    let scraper = ResilientScraper::new(
        fast_fetcher(1),
        MarkdownParser::new(),
        store.clone(),
        &EngineConfig::default(),
    );

    let outcome = scraper
        .scrape(&ScrapeRequest::new(Some("north".into()), None))
        .await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert_eq!(outcome.source_id.as_deref(), Some("ok"));
    assert_eq!(outcome.method, Some(FetchMethod::Direct));
    assert_eq!(outcome.tier, Some(Tier::Primary));
    assert_eq!(outcome.items[0].kind, ContentKind::ArticleSet);
    assert_eq!(
        outcome.items[0].title.as_deref(),
        Some("City council approves budget")
    );
    assert_eq!(outcome.errors.len(), 1);

    let failed = store.source("overloaded").unwrap();
    assert_eq!(failed.total_attempts, 1);
    assert!(failed.success_rate < 100.0);
    assert_eq!(store.source("ok").unwrap().total_attempts, 1);
}
