use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use herald_client::{FetcherConfig, MarkdownParser, ResilientFetcher};
use herald_core::models::{SourceRecord, SourceType};
use herald_core::retry::RetryConfig;
use herald_core::store::MemorySourceStore;
use herald_core::{EngineConfig, ResilientScraper};
use herald_db::AnySourceStore;
use herald_server::routes;
use herald_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

const STORY: &str = "<html><head><title>Bridge reopens</title></head><body>\
    <p>The Main Street bridge reopened to traffic on Monday after eight months of repairs.</p>\
    </body></html>";

pub struct TestApp {
    pub router: Router,
    pub origin: String,
}

/// Router over an in-memory store with two sources: `story` (region north)
/// served by a local origin, and `dead` (region south) pointing at a
/// closed port.
pub async fn setup_test_app() -> TestApp {
    let origin = spawn_origin().await;
    let dead = closed_url().await;

    let store = AnySourceStore::Memory(MemorySourceStore::new(vec![
        SourceRecord::new("story", "Story Daily", format!("{origin}/story"), SourceType::Hyperlocal)
            .with_credibility(90.0)
            .with_regions(["north"]),
        SourceRecord::new("dead", "Dead Gazette", dead, SourceType::Regional)
            .with_credibility(90.0)
            .with_regions(["south"]),
    ]));

    let retry = RetryConfig::default()
        .with_max_retries(1)
        .with_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(Duration::ZERO);
    let config = EngineConfig::default().with_retry(retry.clone());
    let fetcher = ResilientFetcher::new(
        FetcherConfig::default()
            .with_retry(retry)
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2)),
    )
    .expect("Failed to build fetcher");

    let scraper = ResilientScraper::new(fetcher, MarkdownParser::new(), store.clone(), &config);
    let state = Arc::new(AppState {
        scraper,
        store,
        api_key: TEST_API_KEY.to_string(),
    });

    TestApp {
        router: routes::router(state),
        origin,
    }
}

async fn spawn_origin() -> String {
    let app = Router::new().route("/story", get(|| async { Html(STORY) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin");
    let addr = listener.local_addr().expect("Failed to read origin address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Origin server failed");
    });
    format!("http://{addr}")
}

async fn closed_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to read address");
    drop(listener);
    format!("http://{addr}/gone")
}
