use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, Html, IntoResponse, Response};
use axum::routing::get;
use herald_client::{FetcherConfig, ResilientFetcher};
use herald_core::retry::RetryConfig;

pub const ARTICLE: &str = "<html><head><title>City council approves budget</title></head>\
    <body><h1>City council approves budget</h1>\
    <p>The council voted seven to two on Tuesday night to approve next year's budget, \
    including new funding for road repairs and the public library.</p></body></html>";

const CAPTCHA: &str = "<html><body><p>Please complete the CAPTCHA below so we can \
    verify you are human before continuing to the site.</p></body></html>";

/// Request counters for the local origin server.
#[derive(Default)]
pub struct OriginHits {
    pub root: AtomicUsize,
    pub overloaded: AtomicUsize,
    pub flaky: AtomicUsize,
}

impl OriginHits {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct TestOrigin {
    pub base_url: String,
    pub hits: Arc<OriginHits>,
}

impl TestOrigin {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Spawn an in-process origin on an ephemeral port.
pub async fn spawn_origin() -> TestOrigin {
    let hits = Arc::new(OriginHits::default());
    let app = Router::new()
        .route("/", get(root))
        .route("/ok", get(|| async { Html(ARTICLE) }))
        .route("/short", get(|| async { Html("<p>tiny</p>") }))
        .route("/captcha", get(captcha))
        .route("/partial", get(partial))
        .route("/overloaded", get(overloaded))
        .route("/flaky", get(flaky))
        .route("/members", get(members))
        .route(
            "/head-blocked",
            get(partial).head(|| async { StatusCode::METHOD_NOT_ALLOWED }),
        )
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin");
    let addr = listener.local_addr().expect("Failed to read origin address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Origin server failed");
    });

    TestOrigin {
        base_url: format!("http://{addr}"),
        hits,
    }
}

/// An address nothing listens on.
pub async fn closed_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to read address");
    drop(listener);
    format!("http://{addr}/gone")
}

pub fn fast_fetcher(max_retries: u32) -> ResilientFetcher {
    let retry = RetryConfig::default()
        .with_max_retries(max_retries)
        .with_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(Duration::ZERO)
        .with_restricted_min_delay(Duration::from_millis(5));
    let config = FetcherConfig::default()
        .with_retry(retry)
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));
    ResilientFetcher::new(config).expect("Failed to build fetcher")
}

async fn root(State(hits): State<Arc<OriginHits>>) -> impl IntoResponse {
    hits.root.fetch_add(1, Ordering::SeqCst);
    (
        AppendHeaders([
            (header::SET_COOKIE, "session=abc123; Path=/; HttpOnly"),
            (header::SET_COOKIE, "consent=yes; Max-Age=3600"),
        ]),
        Html("<p>home</p>"),
    )
}

async fn captcha(headers: HeaderMap) -> Response {
    if headers.contains_key(header::RANGE) {
        (StatusCode::PARTIAL_CONTENT, Html(CAPTCHA)).into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn partial(headers: HeaderMap) -> Response {
    if headers.contains_key(header::RANGE) {
        (StatusCode::PARTIAL_CONTENT, Html(ARTICLE)).into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn overloaded(State(hits): State<Arc<OriginHits>>) -> StatusCode {
    hits.overloaded.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE
}

async fn flaky(State(hits): State<Arc<OriginHits>>) -> Response {
    if hits.flaky.fetch_add(1, Ordering::SeqCst) == 0 {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else {
        Html(ARTICLE).into_response()
    }
}

async fn members(headers: HeaderMap) -> Response {
    let has_session = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains("session=abc123"));
    if has_session {
        Html(ARTICLE).into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}
