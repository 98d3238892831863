//! Tiered source routing.
//!
//! Sources are ranked by a composite quality score and partitioned into
//! PRIMARY / SECONDARY / EMERGENCY tiers using circuit-breaker health. Pools
//! are cached per [`SourceFilter`] and rebuilt wholesale, at most once per
//! refresh interval unless forced.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::circuit_breaker::{CircuitBreakerRegistry, SourceHealth};
use crate::error::AppError;
use crate::models::{AttemptMetrics, EngineEvent, SourceFilter, SourceRecord, Tier, clamp_score};
use crate::traits::SourceStore;

const CREDIBILITY_WEIGHT: f64 = 0.3;
const SUCCESS_WEIGHT: f64 = 0.4;
const RESPONSE_TIME_WEIGHT: f64 = 0.2;
const RECENCY_WEIGHT: f64 = 0.1;

/// Score given to sources that have never been timed.
const UNKNOWN_RESPONSE_TIME_SCORE: f64 = 50.0;

/// `100 - ms / 100`, clamped: 0ms scores 100, 10s or slower scores 0.
pub fn response_time_score(avg_response_ms: Option<f64>) -> f64 {
    match avg_response_ms {
        Some(ms) => clamp_score(100.0 - ms / 100.0),
        None => UNKNOWN_RESPONSE_TIME_SCORE,
    }
}

/// Composite quality score in `[0, 100]`.
pub fn quality_score(
    credibility: f64,
    success_rate: f64,
    avg_response_ms: Option<f64>,
    recently_active: bool,
) -> f64 {
    let recency = if recently_active { 100.0 } else { 0.0 };
    clamp_score(
        clamp_score(credibility) * CREDIBILITY_WEIGHT
            + clamp_score(success_rate) * SUCCESS_WEIGHT
            + response_time_score(avg_response_ms) * RESPONSE_TIME_WEIGHT
            + recency * RECENCY_WEIGHT,
    )
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum time between two non-forced rebuilds of the same pool.
    pub refresh_interval: Duration,
    pub primary_min_quality: f64,
    pub secondary_min_quality: f64,
    /// Fallback candidates returned alongside a selection.
    pub max_fallbacks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            primary_min_quality: 75.0,
            secondary_min_quality: 60.0,
            max_fallbacks: 3,
        }
    }
}

impl PoolConfig {
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Tier for a source with the given breaker health and quality.
    pub fn tier_for(&self, health: SourceHealth, quality: f64) -> Tier {
        match health {
            SourceHealth::Healthy if quality >= self.primary_min_quality => Tier::Primary,
            SourceHealth::Healthy | SourceHealth::Degraded | SourceHealth::Recovering
                if quality >= self.secondary_min_quality =>
            {
                Tier::Secondary
            }
            _ => Tier::Emergency,
        }
    }
}

/// A source with the scores it was classified by.
#[derive(Debug, Clone, Serialize)]
pub struct RankedSource {
    pub source: SourceRecord,
    pub quality_score: f64,
    pub health: SourceHealth,
    pub health_score: f64,
}

/// Immutable snapshot of the three tiers for one filter.
#[derive(Debug, Clone)]
pub struct SourcePools {
    pub filter: SourceFilter,
    pub primary: Vec<RankedSource>,
    pub secondary: Vec<RankedSource>,
    pub emergency: Vec<RankedSource>,
    pub refreshed_at: DateTime<Utc>,
    refreshed: Instant,
}

impl SourcePools {
    pub fn tier(&self, tier: Tier) -> &[RankedSource] {
        match tier {
            Tier::Primary => &self.primary,
            Tier::Secondary => &self.secondary,
            Tier::Emergency => &self.emergency,
        }
    }

    /// Every classified source, tier by tier.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &RankedSource)> {
        Tier::ALL
            .into_iter()
            .flat_map(move |tier| self.tier(tier).iter().map(move |r| (tier, r)))
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len() + self.emergency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_due(&self, interval: Duration) -> bool {
        self.refreshed.elapsed() >= interval
    }
}

/// Result of [`SourcePoolManager::select_source`].
#[derive(Debug, Clone)]
pub struct SourceSelection {
    pub source: SourceRecord,
    pub tier: Tier,
    pub quality_score: f64,
    /// Next-best healthy sources in the same tier, best first.
    pub fallbacks: Vec<SourceRecord>,
    pub reason: String,
}

impl SourceSelection {
    /// The selected source followed by its fallbacks.
    pub fn candidates(&self) -> impl Iterator<Item = &SourceRecord> {
        std::iter::once(&self.source).chain(self.fallbacks.iter())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub tier: Tier,
    pub count: usize,
    pub avg_quality: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub tiers: Vec<TierStats>,
    pub total_sources: usize,
    /// Number of filters with a cached pool.
    pub pools: usize,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

/// Classifies sources into tiers and picks one (plus fallbacks) per request.
#[derive(Clone)]
pub struct SourcePoolManager<S: SourceStore> {
    store: S,
    breakers: CircuitBreakerRegistry,
    config: PoolConfig,
    pools: Arc<RwLock<HashMap<SourceFilter, Arc<SourcePools>>>>,
    /// Serializes rebuilds so concurrent callers don't all hit the store.
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<S: SourceStore> SourcePoolManager<S> {
    pub fn new(store: S, breakers: CircuitBreakerRegistry, config: PoolConfig) -> Self {
        Self {
            store,
            breakers,
            config,
            pools: Arc::new(RwLock::new(HashMap::new())),
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    fn read_pools(&self) -> RwLockReadGuard<'_, HashMap<SourceFilter, Arc<SourcePools>>> {
        self.pools.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pool table");
            poisoned.into_inner()
        })
    }

    fn write_pools(&self) -> RwLockWriteGuard<'_, HashMap<SourceFilter, Arc<SourcePools>>> {
        self.pools.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pool table");
            poisoned.into_inner()
        })
    }

    /// Last built pools for `filter`, without refreshing.
    pub fn cached_pools(&self, filter: &SourceFilter) -> Option<Arc<SourcePools>> {
        self.read_pools().get(filter).cloned()
    }

    /// Filters that currently have a cached pool.
    pub fn tracked_filters(&self) -> Vec<SourceFilter> {
        self.read_pools().keys().cloned().collect()
    }

    fn fresh_pools(&self, filter: &SourceFilter) -> Option<Arc<SourcePools>> {
        self.cached_pools(filter)
            .filter(|p| !p.is_due(self.config.refresh_interval))
    }

    /// Rebuild the tiers for `filter` if the refresh interval has elapsed
    /// (or unconditionally when `force`), returning the current pools.
    pub async fn refresh_pools(
        &self,
        filter: &SourceFilter,
        force: bool,
    ) -> Result<Arc<SourcePools>, AppError> {
        if !force && let Some(pools) = self.fresh_pools(filter) {
            return Ok(pools);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have rebuilt while we waited.
        if !force && let Some(pools) = self.fresh_pools(filter) {
            return Ok(pools);
        }

        let sources = self.store.list_active_sources(filter).await?;
        let pools = Arc::new(self.classify(filter, sources));

        tracing::info!(
            filter = %filter,
            primary = pools.primary.len(),
            secondary = pools.secondary.len(),
            emergency = pools.emergency.len(),
            "Source pools refreshed"
        );

        self.write_pools().insert(filter.clone(), Arc::clone(&pools));
        Ok(pools)
    }

    /// Rebuild every tracked pool (or the unfiltered one when none exist yet).
    pub async fn force_refresh(&self) -> Result<usize, AppError> {
        let mut filters = self.tracked_filters();
        if filters.is_empty() {
            filters.push(SourceFilter::any());
        }
        for filter in &filters {
            self.refresh_pools(filter, true).await?;
        }
        Ok(filters.len())
    }

    fn classify(&self, filter: &SourceFilter, sources: Vec<SourceRecord>) -> SourcePools {
        let now = Utc::now();
        let mut pools = SourcePools {
            filter: filter.clone(),
            primary: Vec::new(),
            secondary: Vec::new(),
            emergency: Vec::new(),
            refreshed_at: now,
            refreshed: Instant::now(),
        };

        for source in sources {
            if !source.active || !source.matches(filter) {
                continue;
            }
            let source = source.normalized();
            let quality_score = quality_score(
                source.credibility_score,
                source.success_rate,
                source.avg_response_ms,
                source.is_recently_active(now),
            );
            let breaker = self.breakers.breaker(&source.id);
            let health = breaker.health();
            let ranked = RankedSource {
                health_score: breaker.health_score(),
                source,
                quality_score,
                health,
            };
            match self.config.tier_for(health, quality_score) {
                Tier::Primary => pools.primary.push(ranked),
                Tier::Secondary => pools.secondary.push(ranked),
                Tier::Emergency => pools.emergency.push(ranked),
            }
        }

        for tier in [&mut pools.primary, &mut pools.secondary, &mut pools.emergency] {
            tier.sort_by(|a, b| {
                b.quality_score
                    .total_cmp(&a.quality_score)
                    .then_with(|| a.source.id.cmp(&b.source.id))
            });
        }
        pools
    }

    /// Current pools for `filter`; on a store failure the previous pools
    /// are kept.
    async fn current_pools(&self, filter: &SourceFilter) -> Option<Arc<SourcePools>> {
        match self.refresh_pools(filter, false).await {
            Ok(pools) => Some(pools),
            Err(e) => {
                tracing::warn!(filter = %filter, error = %e, "Pool refresh failed, using previous pools");
                self.cached_pools(filter)
            }
        }
    }

    /// Pick the best healthy source for `filter`, plus up to
    /// `max_fallbacks` next-best healthy sources from the same tier.
    ///
    /// Tiers are scanned preferred-first, then PRIMARY, SECONDARY,
    /// EMERGENCY. Breaker state is re-checked here, so a source whose
    /// circuit opened since the last refresh is never returned.
    pub async fn select_source(
        &self,
        filter: &SourceFilter,
        preferred: Option<Tier>,
    ) -> Option<SourceSelection> {
        let pools = self.current_pools(filter).await?;

        let order = preferred
            .into_iter()
            .chain(Tier::ALL.into_iter().filter(|t| Some(*t) != preferred));

        for tier in order {
            let mut healthy = pools
                .tier(tier)
                .iter()
                .filter(|r| self.breakers.is_source_healthy(&r.source.id));

            let Some(best) = healthy.next() else {
                continue;
            };
            let fallbacks: Vec<SourceRecord> = healthy
                .take(self.config.max_fallbacks)
                .map(|r| r.source.clone())
                .collect();

            let reason = format!(
                "{} tier: '{}' has the highest quality score ({:.1}) among healthy sources, {} fallback(s)",
                tier,
                best.source.name,
                best.quality_score,
                fallbacks.len()
            );
            tracing::debug!(
                source_id = %best.source.id,
                tier = %tier,
                quality = best.quality_score,
                fallbacks = fallbacks.len(),
                "Source selected"
            );
            return Some(SourceSelection {
                source: best.source.clone(),
                tier,
                quality_score: best.quality_score,
                fallbacks,
                reason,
            });
        }

        tracing::warn!(filter = %filter, "No healthy source in any tier");
        None
    }

    /// Every source classified for `filter`, whatever its tier or health.
    pub async fn known_sources(&self, filter: &SourceFilter) -> Vec<SourceRecord> {
        match self.current_pools(filter).await {
            Some(pools) => pools.iter().map(|(_, r)| r.source.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// One active source by id, read from the store.
    pub async fn find_source(&self, source_id: &str) -> Result<SourceRecord, AppError> {
        self.store
            .list_active_sources(&SourceFilter::any())
            .await?
            .into_iter()
            .find(|s| s.id == source_id)
            .ok_or_else(|| AppError::SourceNotFound(source_id.to_string()))
    }

    /// Feed one attempt back into the store. Failures are logged, not raised.
    pub async fn record_attempt(&self, metrics: &AttemptMetrics) {
        if let Err(e) = self.store.record_attempt(metrics).await {
            tracing::warn!(source_id = %metrics.source_id, error = %e, "Failed to record attempt metrics");
        }
    }

    pub async fn log_event(&self, event: &EngineEvent) {
        if let Err(e) = self.store.log_event(event).await {
            tracing::warn!(event_id = %event.id, error = %e, "Failed to log engine event");
        }
    }

    /// Per-tier counts and average quality across all cached pools.
    ///
    /// A source cached under several filters is counted once, from the most
    /// recently refreshed pool.
    pub fn stats(&self) -> PoolStats {
        let mut pools: Vec<Arc<SourcePools>> = self.read_pools().values().cloned().collect();
        pools.sort_by(|a, b| b.refreshed_at.cmp(&a.refreshed_at));

        let mut seen = HashSet::new();
        let mut sums: HashMap<Tier, (usize, f64)> = HashMap::new();
        for (tier, ranked) in pools.iter().flat_map(|p| p.iter()) {
            if seen.insert(ranked.source.id.clone()) {
                let entry = sums.entry(tier).or_default();
                entry.0 += 1;
                entry.1 += ranked.quality_score;
            }
        }

        let tiers = Tier::ALL
            .into_iter()
            .map(|tier| {
                let (count, total) = sums.get(&tier).copied().unwrap_or_default();
                TierStats {
                    tier,
                    count,
                    avg_quality: (count > 0).then(|| total / count as f64),
                }
            })
            .collect();

        PoolStats {
            tiers,
            total_sources: seen.len(),
            pools: pools.len(),
            last_refreshed_at: pools.first().map(|p| p.refreshed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::models::SourceType;
    use crate::testutil::MockSourceStore;

    fn recent() -> DateTime<Utc> {
        Utc::now() - TimeDelta::hours(1)
    }

    fn source_a() -> SourceRecord {
        SourceRecord::new("a", "Alpha Gazette", "https://a.example", SourceType::Regional)
            .with_credibility(85.0)
            .with_success_rate(95.0)
            .with_avg_response_ms(1000.0)
            .with_last_attempt(recent())
    }

    fn source_b() -> SourceRecord {
        SourceRecord::new("b", "Beta Bulletin", "https://b.example", SourceType::Regional)
            .with_credibility(50.0)
            .with_success_rate(40.0)
            .with_avg_response_ms(3000.0)
            .with_last_attempt(recent())
    }

    fn source(id: &str, credibility: f64) -> SourceRecord {
        SourceRecord::new(id, id, format!("https://{id}.example"), SourceType::National)
            .with_credibility(credibility)
            .with_success_rate(95.0)
            .with_avg_response_ms(500.0)
            .with_last_attempt(recent())
    }

    fn manager(sources: Vec<SourceRecord>) -> (SourcePoolManager<MockSourceStore>, MockSourceStore) {
        let store = MockSourceStore::new(sources);
        let breakers = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default().with_failure_threshold(2),
        );
        (
            SourcePoolManager::new(store.clone(), breakers, PoolConfig::default()),
            store,
        )
    }

    fn trip(manager: &SourcePoolManager<MockSourceStore>, id: &str) {
        let breaker = manager.breakers().breaker(id);
        for _ in 0..2 {
            breaker.record_failure(&AppError::NetworkError("down".into()));
        }
    }

    #[test]
    fn test_quality_score_fixture() {
        // 80*0.3 + 90*0.4 + (100 - 2000/100)*0.2 + 100*0.1
        assert_eq!(quality_score(80.0, 90.0, Some(2000.0), true), 86.0);
        assert_eq!(quality_score(80.0, 90.0, Some(2000.0), true), 86.0);
    }

    #[test]
    fn test_quality_score_bounds() {
        assert_eq!(quality_score(100.0, 100.0, Some(0.0), true), 100.0);
        assert_eq!(quality_score(0.0, 0.0, Some(60_000.0), false), 0.0);
        assert_eq!(quality_score(500.0, -20.0, Some(-5.0), true), 60.0);
        assert_eq!(quality_score(f64::NAN, 0.0, None, false), 10.0);
    }

    #[test]
    fn test_tier_thresholds() {
        let config = PoolConfig::default();
        assert_eq!(config.tier_for(SourceHealth::Healthy, 91.5), Tier::Primary);
        assert_eq!(config.tier_for(SourceHealth::Healthy, 70.0), Tier::Secondary);
        assert_eq!(config.tier_for(SourceHealth::Degraded, 91.5), Tier::Secondary);
        assert_eq!(config.tier_for(SourceHealth::Recovering, 65.0), Tier::Secondary);
        assert_eq!(config.tier_for(SourceHealth::Healthy, 55.0), Tier::Emergency);
        assert_eq!(config.tier_for(SourceHealth::Unhealthy, 99.0), Tier::Emergency);
    }

    #[tokio::test]
    async fn test_scenario_a_primary_b_emergency() {
        let (manager, _) = manager(vec![source_b(), source_a()]);
        let pools = manager.refresh_pools(&SourceFilter::any(), false).await.unwrap();

        assert_eq!(pools.primary.len(), 1);
        assert_eq!(pools.primary[0].source.id, "a");
        assert_eq!(pools.primary[0].quality_score, 91.5);
        assert_eq!(pools.emergency.len(), 1);
        assert_eq!(pools.emergency[0].source.id, "b");
        assert_eq!(pools.emergency[0].quality_score, 55.0);

        let selection = manager.select_source(&SourceFilter::any(), None).await.unwrap();
        assert_eq!(selection.source.id, "a");
        assert_eq!(selection.tier, Tier::Primary);
        assert!(selection.reason.contains("primary"));
    }

    #[tokio::test]
    async fn test_tiers_partition_active_sources() {
        let mut sources: Vec<_> = (0..10).map(|i| source(&format!("s{i}"), i as f64 * 10.0)).collect();
        sources.push(source("off", 90.0).inactive());
        let (manager, _) = manager(sources);
        trip(&manager, "s9");

        let pools = manager.refresh_pools(&SourceFilter::any(), true).await.unwrap();
        assert_eq!(pools.len(), 10);
        let ids: HashSet<_> = pools.iter().map(|(_, r)| r.source.id.clone()).collect();
        assert_eq!(ids.len(), 10);
        assert!(!ids.contains("off"));
        assert!(pools.emergency.iter().any(|r| r.source.id == "s9"));

        for tier in [&pools.primary, &pools.secondary, &pools.emergency] {
            assert!(tier.windows(2).all(|w| w[0].quality_score >= w[1].quality_score));
        }
    }

    #[tokio::test]
    async fn test_select_never_returns_open_source() {
        let (manager, _) = manager(vec![source("x", 90.0), source("y", 80.0)]);
        manager.refresh_pools(&SourceFilter::any(), false).await.unwrap();
        // Opened after the pools were built.
        trip(&manager, "x");

        let selection = manager.select_source(&SourceFilter::any(), None).await.unwrap();
        assert_eq!(selection.source.id, "y");
        assert!(selection.fallbacks.is_empty());

        trip(&manager, "y");
        assert!(manager.select_source(&SourceFilter::any(), None).await.is_none());
    }

    #[tokio::test]
    async fn test_fallbacks_capped_and_ordered() {
        let sources = (0..6).map(|i| source(&format!("p{i}"), 100.0 - i as f64)).collect();
        let (manager, _) = manager(sources);
        let selection = manager.select_source(&SourceFilter::any(), None).await.unwrap();
        assert_eq!(selection.source.id, "p0");
        let fallbacks: Vec<_> = selection.fallbacks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(fallbacks, vec!["p1", "p2", "p3"]);
        assert_eq!(selection.candidates().count(), 4);
    }

    #[tokio::test]
    async fn test_preferred_tier_scanned_first() {
        let (manager, _) = manager(vec![source_a(), source_b()]);
        let selection = manager
            .select_source(&SourceFilter::any(), Some(Tier::Emergency))
            .await
            .unwrap();
        assert_eq!(selection.source.id, "b");
        assert_eq!(selection.tier, Tier::Emergency);
    }

    #[tokio::test]
    async fn test_refresh_is_bounded() {
        let (manager, store) = manager(vec![source_a()]);
        let filter = SourceFilter::any();
        manager.refresh_pools(&filter, false).await.unwrap();
        manager.refresh_pools(&filter, false).await.unwrap();
        manager.select_source(&filter, None).await.unwrap();
        assert_eq!(store.list_calls(), 1);

        manager.refresh_pools(&filter, true).await.unwrap();
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_pools() {
        let store = MockSourceStore::new(vec![source_a()]);
        let manager = SourcePoolManager::new(
            store.clone(),
            CircuitBreakerRegistry::default(),
            PoolConfig::default().with_refresh_interval(Duration::ZERO),
        );
        let filter = SourceFilter::any();
        manager.refresh_pools(&filter, false).await.unwrap();

        store.fail_listing(true);
        assert!(manager.refresh_pools(&filter, false).await.is_err());
        let selection = manager.select_source(&filter, None).await.unwrap();
        assert_eq!(selection.source.id, "a");
    }

    #[tokio::test]
    async fn test_no_pools_and_store_down() {
        let store = MockSourceStore::new(vec![source_a()]);
        store.fail_listing(true);
        let manager =
            SourcePoolManager::new(store, CircuitBreakerRegistry::default(), PoolConfig::default());
        assert!(manager.select_source(&SourceFilter::any(), None).await.is_none());
        assert!(manager.known_sources(&SourceFilter::any()).await.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let (manager, _) = manager(vec![source_a(), source_b()]);
        manager.refresh_pools(&SourceFilter::any(), false).await.unwrap();
        manager
            .refresh_pools(&SourceFilter::new(Some("ohio".into()), None), false)
            .await
            .unwrap();

        let stats = manager.stats();
        assert_eq!(stats.pools, 2);
        assert_eq!(stats.total_sources, 2);
        let primary = &stats.tiers[0];
        assert_eq!(primary.tier, Tier::Primary);
        assert_eq!(primary.count, 1);
        assert_eq!(primary.avg_quality, Some(91.5));
        assert_eq!(stats.tiers[1].avg_quality, None);
    }

    #[tokio::test]
    async fn test_force_refresh_rebuilds_tracked_filters() {
        let (manager, store) = manager(vec![source_a()]);
        assert_eq!(manager.force_refresh().await.unwrap(), 1);
        manager
            .refresh_pools(&SourceFilter::new(None, Some("politics".into())), false)
            .await
            .unwrap();
        assert_eq!(manager.force_refresh().await.unwrap(), 2);
        assert_eq!(store.list_calls(), 4);
    }
}
