//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::AppError;
use crate::models::{
    AttemptMetrics, ContentItem, ContentKind, EngineEvent, FetchMethod, FetchRequest, FetchedPage,
    ProbeMethod, ProbeResult, SourceFilter, SourceRecord,
};
use crate::traits::{ContentParser, Fetcher, SourceStore};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with a response queue per target.
///
/// Each call pops the first queued response for its target. A target with
/// nothing queued fails with a `NetworkError`. Probes succeed unless the
/// target was marked unreachable.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, Vec<Result<String, AppError>>>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, target: &str, body: &str) -> Self {
        self.push(target, Ok(body.to_string()));
        self
    }

    pub fn with_error(self, target: &str, error: AppError) -> Self {
        self.push(target, Err(error));
        self
    }

    pub fn with_unreachable(self, target: &str) -> Self {
        self.unreachable.lock().unwrap().insert(target.to_string());
        self
    }

    pub fn push(&self, target: &str, response: Result<String, AppError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .push(response);
    }

    /// Targets fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, AppError> {
        self.calls.lock().unwrap().push(request.target.clone());
        let next = {
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(&request.target) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };
        let body = match next {
            Some(response) => response?,
            None => {
                return Err(AppError::NetworkError(format!(
                    "no mock response for {}",
                    request.target
                )));
            }
        };
        Ok(FetchedPage {
            target: request.target.clone(),
            body,
            status: 200,
            content_type: Some("text/html".into()),
            method: FetchMethod::Direct,
            attempts: 1,
        })
    }

    async fn probe(&self, request: &FetchRequest) -> ProbeResult {
        if self.unreachable.lock().unwrap().contains(&request.target) {
            return ProbeResult {
                target: request.target.clone(),
                reachable: false,
                status: None,
                method: ProbeMethod::RangedGet,
                latency_ms: 0,
                error: Some("connection refused".into()),
            };
        }
        ProbeResult {
            target: request.target.clone(),
            reachable: true,
            status: Some(200),
            method: ProbeMethod::Head,
            latency_ms: 0,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser that wraps the whole page body in a single item.
#[derive(Clone)]
pub struct MockParser {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockParser {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Fails the next parse with `error`, then passes through.
    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl ContentParser for MockParser {
    fn parse(
        &self,
        source: &SourceRecord,
        page: &FetchedPage,
    ) -> Result<Vec<ContentItem>, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(vec![ContentItem {
            source_id: source.id.clone(),
            url: page.target.clone(),
            title: None,
            body: page.body.clone(),
            kind: ContentKind::ArticleSet,
            fetched_at: Utc::now(),
        }])
    }
}

// ---------------------------------------------------------------------------
// MockSourceStore
// ---------------------------------------------------------------------------

/// In-memory source store recording every write.
#[derive(Clone, Default)]
pub struct MockSourceStore {
    sources: Arc<Mutex<Vec<SourceRecord>>>,
    attempts: Arc<Mutex<Vec<AttemptMetrics>>>,
    events: Arc<Mutex<Vec<EngineEvent>>>,
    list_calls: Arc<AtomicUsize>,
    fail_list: Arc<AtomicBool>,
}

impl MockSourceStore {
    pub fn new(sources: Vec<SourceRecord>) -> Self {
        Self {
            sources: Arc::new(Mutex::new(sources)),
            ..Default::default()
        }
    }

    pub fn set_sources(&self, sources: Vec<SourceRecord>) {
        *self.sources.lock().unwrap() = sources;
    }

    /// Make `list_active_sources` fail until turned off again.
    pub fn fail_listing(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> Vec<AttemptMetrics> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SourceStore for MockSourceStore {
    async fn list_active_sources(
        &self,
        filter: &SourceFilter,
    ) -> Result<Vec<SourceRecord>, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError("mock store unavailable".into()));
        }
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.active && s.matches(filter))
            .cloned()
            .collect())
    }

    async fn record_attempt(&self, metrics: &AttemptMetrics) -> Result<(), AppError> {
        self.attempts.lock().unwrap().push(metrics.clone());
        Ok(())
    }

    async fn log_event(&self, event: &EngineEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
