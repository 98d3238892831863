use std::future::Future;

use crate::error::AppError;
use crate::models::{
    AttemptMetrics, ContentItem, EngineEvent, FetchRequest, FetchedPage, ProbeResult,
    SourceFilter, SourceRecord,
};

/// Performs one resilient logical fetch of a target.
///
/// Implementations own retries, backoff and anti-blocking fallbacks; the
/// returned error is final for this source.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;

    /// Cheap reachability check without downloading the full page.
    fn probe(&self, request: &FetchRequest) -> impl Future<Output = ProbeResult> + Send;
}

/// Turns a validated payload into content items.
pub trait ContentParser: Send + Sync + Clone {
    fn parse(&self, source: &SourceRecord, page: &FetchedPage)
    -> Result<Vec<ContentItem>, AppError>;
}

/// Persistent source metadata and metrics sink.
pub trait SourceStore: Send + Sync + Clone {
    /// Active sources matching the filter.
    fn list_active_sources(
        &self,
        filter: &SourceFilter,
    ) -> impl Future<Output = Result<Vec<SourceRecord>, AppError>> + Send;

    /// Merge one attempt into the source's rolling statistics.
    fn record_attempt(
        &self,
        metrics: &AttemptMetrics,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn log_event(&self, event: &EngineEvent) -> impl Future<Output = Result<(), AppError>> + Send;
}
