use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use herald_core::traits::SourceStore;
use herald_core::SourceFilter;
use herald_core::models::SourceType;
use herald_db::AnySourceStore;

use crate::integration::common::{TEST_API_KEY, setup_test_app};

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header("authorization", format!("Bearer {TEST_API_KEY}"))
}

fn scrape_request(body: serde_json::Value) -> Request<Body> {
    authed(Request::post("/v1/scrape"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store"], "ok");
    assert_eq!(json["backend"], "memory");
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/system/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/system/health")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn scrape_fetches_then_serves_from_cache() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(scrape_request(serde_json::json!({"region": "north"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["source_id"], "story");
    assert_eq!(json["method"], "direct");
    assert_eq!(json["tier"], "primary");
    assert_eq!(json["cache"]["stored"], true);
    assert_eq!(json["items"][0]["title"], "Bridge reopens");
    assert_eq!(json["items"][0]["content_hash"].as_str().unwrap().len(), 64);

    let response = app
        .router
        .oneshot(scrape_request(serde_json::json!({"region": "north"})))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["method"], "cache");
    assert_eq!(json["cache"]["used"], true);
}

#[tokio::test]
async fn scrape_with_no_live_source_returns_503() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(scrape_request(serde_json::json!({"region": "south"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["items"], serde_json::json!([]));
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.first().unwrap()["kind"], "network");
    assert_eq!(errors.last().unwrap()["kind"], "all_sources_exhausted");
}

#[tokio::test]
async fn scrape_with_unknown_tier_returns_400() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(scrape_request(
            serde_json::json!({"region": "north", "preferred_tier": "platinum"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn refresh_pools_reports_filters() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            authed(Request::post("/v1/pools/refresh"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["filters_refreshed"], 1);
}

#[tokio::test]
async fn probe_reports_reachability() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            authed(Request::get(format!(
                "/v1/sources/probe?url={}/story",
                app.origin
            )))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["reachable"], true);
    assert_eq!(json["method"], "head");

    let response = app
        .router
        .oneshot(
            authed(Request::get("/v1/sources/probe?url=ftp://example.com/file"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_source_degrades_system_health() {
    let app = setup_test_app().await;

    // Default breaker threshold is five consecutive failures.
    for _ in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(
                authed(Request::post("/v1/sources/dead/probe"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["reachable"], false);
    }

    let response = app
        .router
        .clone()
        .oneshot(
            authed(Request::get("/v1/system/health"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["snapshot"]["circuits"]["open"], 1);
    assert_eq!(json["snapshot"]["degraded_circuits"][0]["source_id"], "dead");

    let response = app
        .router
        .oneshot(
            authed(Request::post("/v1/sources/nowhere/probe"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalidate_cache_and_system_health() {
    let app = setup_test_app().await;

    app.router
        .clone()
        .oneshot(scrape_request(serde_json::json!({"region": "north"})))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            authed(Request::get("/v1/system/health"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["snapshot"]["cache"]["entries"], 1);

    let response = app
        .router
        .oneshot(
            authed(Request::delete("/v1/cache/sources/story"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["source_id"], "story");
    assert_eq!(json["entries_removed"], 1);
}

#[tokio::test]
async fn sources_file_backs_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sources.json");
    std::fs::write(
        &path,
        serde_json::json!([
            {
                "id": "gazette",
                "name": "Gazette",
                "target": "https://gazette.example",
                "source_type": "hyperlocal",
                "credibility_score": 70.0,
                "success_rate": 90.0
            }
        ])
        .to_string(),
    )
    .unwrap();

    let store = AnySourceStore::open(Some(&path)).await.unwrap();
    assert_eq!(store.backend(), "memory");
    let sources = store.list_active_sources(&SourceFilter::any()).await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source_type, SourceType::Hyperlocal);
}
