//! Request orchestration: source selection, cache, breaker-wrapped fetch,
//! fallback chain and the stale-cache emergency path.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{CacheMetadata, CacheStats, ContentCache, cache_key};
use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot, CircuitState, CircuitStats};
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::maintenance::{MaintenanceConfig, MaintenanceService};
use crate::models::{
    AttemptMetrics, CacheProvenance, ContentItem, ContentKind, EngineEvent, FetchMethod,
    FetchRequest, OutcomeError, ProbeResult, ScrapeOutcome, SourceFilter,
    SourceRecord, Tier,
};
use crate::pool::{PoolStats, SourcePoolManager, SourceSelection};
use crate::traits::{ContentParser, Fetcher, SourceStore};

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub cache_enabled: bool,
    /// Optional extra bound on the age of a fresh cache hit.
    pub fresh_max_age: Option<Duration>,
    /// Oldest entry the emergency path may serve.
    pub stale_max_age: Duration,
    /// Overrides the per-kind TTL when storing results.
    pub cache_ttl: Option<Duration>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            fresh_max_age: None,
            stale_max_age: Duration::from_secs(24 * 60 * 60),
            cache_ttl: None,
        }
    }
}

impl ScraperConfig {
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// What to scrape: a region/topic filter and an optional tier preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub preferred_tier: Option<Tier>,
}

impl ScrapeRequest {
    pub fn new(region: Option<String>, topic: Option<String>) -> Self {
        Self {
            region,
            topic,
            preferred_tier: None,
        }
    }

    pub fn with_preferred_tier(mut self, tier: Tier) -> Self {
        self.preferred_tier = Some(tier);
        self
    }

    pub fn filter(&self) -> SourceFilter {
        SourceFilter::new(self.region.clone(), self.topic.clone())
    }
}

/// Operational snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub pools: PoolStats,
    pub circuits: CircuitStats,
    /// Breakers that are not closed.
    pub degraded_circuits: Vec<CircuitSnapshot>,
    pub cache: CacheStats,
}

/// Per-request bookkeeping shared by every step of [`ResilientScraper::scrape`].
struct RequestContext {
    id: Uuid,
    started: Instant,
    errors: Vec<OutcomeError>,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            errors: Vec::new(),
        }
    }

    fn finish(
        self,
        items: Vec<ContentItem>,
        method: FetchMethod,
        tier: Option<Tier>,
        source_id: &str,
        cache: CacheProvenance,
    ) -> ScrapeOutcome {
        ScrapeOutcome {
            request_id: self.id,
            success: true,
            items,
            method: Some(method),
            tier,
            source_id: Some(source_id.to_string()),
            cache,
            errors: self.errors,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    fn fail(self) -> ScrapeOutcome {
        ScrapeOutcome {
            request_id: self.id,
            success: false,
            items: Vec::new(),
            method: None,
            tier: None,
            source_id: None,
            cache: CacheProvenance::default(),
            errors: self.errors,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Composes pools, breakers, cache and the fetch engine into one decision
/// per request.
///
/// Generic over its collaborators so tests can run without HTTP or a
/// database. Cloning is cheap; all shared state lives behind `Arc`s.
#[derive(Clone)]
pub struct ResilientScraper<F, P, S>
where
    F: Fetcher,
    P: ContentParser,
    S: SourceStore,
{
    fetcher: F,
    parser: P,
    pools: SourcePoolManager<S>,
    breakers: CircuitBreakerRegistry,
    cache: ContentCache,
    config: ScraperConfig,
}

impl<F, P, S> ResilientScraper<F, P, S>
where
    F: Fetcher,
    P: ContentParser,
    S: SourceStore,
{
    pub fn new(fetcher: F, parser: P, store: S, config: &EngineConfig) -> Self {
        let breakers = CircuitBreakerRegistry::new(config.breaker.clone());
        let pools = SourcePoolManager::new(store, breakers.clone(), config.pool.clone());
        Self {
            fetcher,
            parser,
            pools,
            breakers,
            cache: ContentCache::new(config.cache.clone()),
            config: config.scraper.clone(),
        }
    }

    pub fn pools(&self) -> &SourcePoolManager<S> {
        &self.pools
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Serve one request. Never fails: every path ends in a [`ScrapeOutcome`].
    pub async fn scrape(&self, request: &ScrapeRequest) -> ScrapeOutcome {
        let mut ctx = RequestContext::new();
        let filter = request.filter();

        let selection = self.pools.select_source(&filter, request.preferred_tier).await;

        if let Some(selection) = &selection {
            tracing::info!(
                request_id = %ctx.id,
                source_id = %selection.source.id,
                reason = %selection.reason,
                "Source selected"
            );
            for source in selection.candidates() {
                match self.try_source(&ctx, source, selection).await {
                    Ok((items, method, cache)) => {
                        return ctx.finish(items, method, Some(selection.tier), &source.id, cache);
                    }
                    Err(e) => {
                        ctx.errors.push(OutcomeError::new(Some(&source.id), &e));
                    }
                }
            }
            tracing::warn!(
                request_id = %ctx.id,
                filter = %filter,
                "Selected source and fallbacks exhausted"
            );
        }

        if let Some((source_id, items, provenance)) =
            self.stale_fallback(&ctx, &filter, selection.as_ref()).await
        {
            let tier = selection.as_ref().map(|s| s.tier);
            return ctx.finish(items, FetchMethod::StaleCache, tier, &source_id, provenance);
        }

        let error = AppError::AllSourcesExhausted;
        tracing::error!(request_id = %ctx.id, filter = %filter, "{error}");
        self.pools.log_event(&EngineEvent::from_error(None, &error)).await;
        ctx.errors.push(OutcomeError::new(None, &error));
        ctx.fail()
    }

    /// Steps 2-3 for one candidate: fresh cache, then breaker-wrapped fetch.
    async fn try_source(
        &self,
        ctx: &RequestContext,
        source: &SourceRecord,
        selection: &SourceSelection,
    ) -> Result<(Vec<ContentItem>, FetchMethod, CacheProvenance), AppError> {
        let key = cache_key(&source.id, &source.target);

        if self.config.cache_enabled
            && let Some(hit) = self.cache.get_fresh(&key, self.config.fresh_max_age)
        {
            tracing::info!(request_id = %ctx.id, source_id = %source.id, "Serving fresh cache hit");
            let provenance = CacheProvenance {
                used: true,
                stale: false,
                stored: false,
                age_secs: Some(hit.age.as_secs() as i64),
            };
            return Ok((hit.items.as_ref().clone(), FetchMethod::Cache, provenance));
        }

        let attempt_started = Instant::now();
        let result = self
            .breakers
            .execute(&source.id, || self.fetch_and_parse(source))
            .await
            .map_err(AppError::from);
        let elapsed = attempt_started.elapsed();

        match result {
            Ok((items, method)) => {
                self.pools
                    .record_attempt(&AttemptMetrics::success(&source.id, method, elapsed))
                    .await;

                let stored = self.config.cache_enabled;
                if stored {
                    let kind = items.first().map_or(ContentKind::RawPage, |i| i.kind);
                    let mut metadata = CacheMetadata::new(&source.id, &source.target, kind);
                    if source.id == selection.source.id {
                        metadata = metadata.with_quality_hint(selection.quality_score);
                    }
                    self.cache
                        .store(&key, items.clone(), metadata, self.config.cache_ttl);
                }

                tracing::info!(
                    request_id = %ctx.id,
                    source_id = %source.id,
                    method = %method,
                    items = items.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Scrape succeeded"
                );
                let provenance = CacheProvenance {
                    stored,
                    ..Default::default()
                };
                Ok((items, method, provenance))
            }
            Err(e @ AppError::CircuitOpen { .. }) => {
                // Fast-fail, not an attempt.
                tracing::debug!(request_id = %ctx.id, source_id = %source.id, "{e}");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.id,
                    source_id = %source.id,
                    error = %e,
                    "Source failed, advancing to next candidate"
                );
                self.pools
                    .record_attempt(&AttemptMetrics::failure(&source.id, elapsed))
                    .await;
                self.pools
                    .log_event(&EngineEvent::from_error(Some(&source.id), &e))
                    .await;
                Err(e)
            }
        }
    }

    async fn fetch_and_parse(
        &self,
        source: &SourceRecord,
    ) -> Result<(Vec<ContentItem>, FetchMethod), AppError> {
        let page = self.fetcher.fetch(&FetchRequest::for_source(source)).await?;
        let items = self.parser.parse(source, &page)?;
        if items.is_empty() {
            return Err(AppError::ParseError(format!(
                "no content items extracted from {}",
                page.target
            )));
        }
        Ok((items, page.method))
    }

    /// Step 5: find an expired-but-present entry from any candidate source.
    ///
    /// Candidates are the selection's sources, or every source known to the
    /// pools for `filter` when nothing could be selected.
    async fn stale_fallback(
        &self,
        ctx: &RequestContext,
        filter: &SourceFilter,
        selection: Option<&SourceSelection>,
    ) -> Option<(String, Vec<ContentItem>, CacheProvenance)> {
        if !self.config.cache_enabled {
            return None;
        }

        let candidates: Vec<SourceRecord> = match selection {
            Some(s) => s.candidates().cloned().collect(),
            None => self.pools.known_sources(filter).await,
        };

        candidates.into_iter().find_map(|source| {
            let key = cache_key(&source.id, &source.target);
            let hit = self.cache.get_stale(&key, self.config.stale_max_age)?;
            tracing::warn!(
                request_id = %ctx.id,
                source_id = %source.id,
                age_secs = hit.age.as_secs(),
                expired = hit.expired,
                "Serving stale cache entry as emergency fallback"
            );
            let provenance = CacheProvenance {
                used: true,
                stale: hit.expired,
                stored: false,
                age_secs: Some(hit.age.as_secs() as i64),
            };
            Some((source.id, hit.items.as_ref().clone(), provenance))
        })
    }

    /// Reachability of an arbitrary target. Touches no source state.
    pub async fn probe_target(&self, target: &str) -> ProbeResult {
        self.fetcher.probe(&FetchRequest::for_target(target)).await
    }

    /// Reachability check of one known source, recorded on its breaker.
    ///
    /// A reachable probe counts as a success, an unreachable one as a
    /// failure that is also written to the event log. Attempt metrics are
    /// left alone: those track full fetches.
    pub async fn probe_source(&self, source_id: &str) -> Result<ProbeResult, AppError> {
        let source = self.pools.find_source(source_id).await?;
        let result = self.fetcher.probe(&FetchRequest::for_source(&source)).await;
        let breaker = self.breakers.breaker(&source.id);

        if result.reachable {
            tracing::info!(
                source_id = %source.id,
                method = result.method.as_str(),
                latency_ms = result.latency_ms,
                "Source reachable"
            );
            breaker.record_success();
        } else {
            let error = probe_failure(&result);
            tracing::warn!(source_id = %source.id, error = %error, "Source unreachable");
            breaker.record_failure(&error);
            self.pools
                .log_event(&EngineEvent::from_error(Some(&source.id), &error))
                .await;
        }

        Ok(result)
    }

    /// Rebuild all pools now, ignoring the refresh interval.
    pub async fn force_refresh(&self) -> Result<usize, AppError> {
        self.pools.force_refresh().await
    }

    /// Drop every cached payload of one source.
    pub fn invalidate_source(&self, source_id: &str) -> usize {
        self.cache.invalidate_source(source_id)
    }

    /// Housekeeping loop sharing this scraper's cache and pools.
    pub fn maintenance(&self, config: MaintenanceConfig) -> MaintenanceService<S> {
        MaintenanceService::new(self.cache.clone(), self.pools.clone(), config)
    }

    pub fn system_health(&self) -> SystemHealth {
        let degraded_circuits = self
            .breakers
            .snapshots()
            .into_iter()
            .filter(|s| s.state != CircuitState::Closed)
            .collect();
        SystemHealth {
            pools: self.pools.stats(),
            circuits: self.breakers.stats(),
            degraded_circuits,
            cache: self.cache.stats(),
        }
    }
}

/// The error an unreachable probe stands for.
fn probe_failure(result: &ProbeResult) -> AppError {
    match result.status {
        Some(status) => AppError::HttpStatus {
            status,
            url: result.target.clone(),
        },
        None => AppError::NetworkError(
            result
                .error
                .clone()
                .unwrap_or_else(|| format!("{} unreachable", result.target)),
        ),
    }
}
