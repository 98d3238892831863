use herald_core::error::AppError;
use herald_core::models::{FetchMethod, FetchRequest, ProbeMethod};
use herald_core::traits::Fetcher;

use crate::integration::common::{ARTICLE, OriginHits, closed_url, fast_fetcher, spawn_origin};

#[tokio::test]
async fn direct_fetch_succeeds_first_attempt() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(3);

    let page = fetcher
        .fetch(&FetchRequest::new(origin.url("/ok")))
        .await
        .unwrap();

    assert_eq!(page.method, FetchMethod::Direct);
    assert_eq!(page.attempts, 1);
    assert_eq!(page.status, 200);
    assert_eq!(page.body, ARTICLE);
    assert!(page.content_type.unwrap().starts_with("text/html"));
}

#[tokio::test]
async fn server_error_is_retried() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(3);

    let page = fetcher
        .fetch(&FetchRequest::new(origin.url("/flaky")))
        .await
        .unwrap();

    assert_eq!(page.attempts, 2);
    assert_eq!(page.method, FetchMethod::Direct);
    assert_eq!(OriginHits::get(&origin.hits.flaky), 2);
}

#[tokio::test]
async fn block_recovered_by_byte_range() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(3);

    let page = fetcher
        .fetch(&FetchRequest::new(origin.url("/partial")))
        .await
        .unwrap();

    assert_eq!(page.method, FetchMethod::RangeFallback);
    assert_eq!(page.status, 206);
    assert_eq!(page.attempts, 1);
}

#[tokio::test]
async fn captcha_behind_block_exhausts_attempts() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(2);

    let err = fetcher
        .fetch(&FetchRequest::new(origin.url("/captcha")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ContentValidation(_)), "got {err:?}");
    // Two blocks flag the domain, so the last attempt warms up first.
    assert!(fetcher.warmup_state().needs_warmup("127.0.0.1").await);
    assert_eq!(OriginHits::get(&origin.hits.root), 1);
}

#[tokio::test]
async fn overloaded_server_fails_fast() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(5);

    let err = fetcher
        .fetch(&FetchRequest::new(origin.url("/overloaded")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::HttpStatus { status: 503, .. }));
    assert_eq!(OriginHits::get(&origin.hits.overloaded), 2);
}

#[tokio::test]
async fn short_body_fails_validation() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(1);

    let err = fetcher
        .fetch(&FetchRequest::new(origin.url("/short")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ContentValidation(_)));
}

#[tokio::test]
async fn connection_failure_is_not_retried() {
    let fetcher = fast_fetcher(3);
    let err = fetcher
        .fetch(&FetchRequest::new(closed_url().await))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NetworkError(_)), "got {err:?}");
}

#[tokio::test]
async fn invalid_url_is_network_error() {
    let fetcher = fast_fetcher(3);
    let err = fetcher
        .fetch(&FetchRequest::new("not a url"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NetworkError(_)));
}

#[tokio::test]
async fn static_warmup_sends_cookies() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(0);
    let mut request = FetchRequest::new(origin.url("/members"));
    request.needs_warmup = true;

    let page = fetcher.fetch(&request).await.unwrap();
    assert_eq!(page.method, FetchMethod::WarmedUp);
    assert_eq!(page.attempts, 1);

    let record = fetcher.warmup_state().record("127.0.0.1").await.unwrap();
    assert_eq!(
        record.cookie_header.as_deref(),
        Some("session=abc123; consent=yes")
    );
    assert_eq!(record.last_status, Some(200));

    // The outcome is reused inside the warm-up window.
    fetcher.fetch(&request).await.unwrap();
    assert_eq!(OriginHits::get(&origin.hits.root), 1);
}

#[tokio::test]
async fn repeated_blocks_enable_warmup() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(3);

    let page = fetcher
        .fetch(&FetchRequest::new(origin.url("/members")))
        .await
        .unwrap();

    assert_eq!(page.method, FetchMethod::WarmedUp);
    assert_eq!(page.attempts, 3);
    assert_eq!(OriginHits::get(&origin.hits.root), 1);
}

#[tokio::test]
async fn probe_uses_head_when_allowed() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(0);

    let result = fetcher.probe(&FetchRequest::new(origin.url("/ok"))).await;
    assert!(result.reachable);
    assert_eq!(result.method, ProbeMethod::Head);
    assert_eq!(result.status, Some(200));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn probe_falls_back_to_ranged_get() {
    let origin = spawn_origin().await;
    let fetcher = fast_fetcher(0);

    let result = fetcher
        .probe(&FetchRequest::new(origin.url("/head-blocked")))
        .await;
    assert!(result.reachable);
    assert_eq!(result.method, ProbeMethod::RangedGet);
    assert_eq!(result.status, Some(206));
}

#[tokio::test]
async fn probe_reports_unreachable() {
    let fetcher = fast_fetcher(0);
    let result = fetcher.probe(&FetchRequest::new(closed_url().await)).await;
    assert!(!result.reachable);
    assert_eq!(result.status, None);
    assert!(result.error.is_some());
}
