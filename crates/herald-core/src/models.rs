use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};
use crate::util::is_restricted_target;

/// Editorial reach of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Hyperlocal,
    Regional,
    National,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Hyperlocal => "hyperlocal",
            SourceType::Regional => "regional",
            SourceType::National => "national",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hyperlocal" => Ok(SourceType::Hyperlocal),
            "regional" => Ok(SourceType::Regional),
            "national" => Ok(SourceType::National),
            _ => Err(format!("Unknown source type: {s}")),
        }
    }
}

/// A content source as known to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub name: String,
    /// URL fetched for this source (front page, section page or feed).
    pub target: String,
    pub source_type: SourceType,
    /// Editorial credibility, 0-100.
    pub credibility_score: f64,
    /// Rolling success rate, 0-100.
    pub success_rate: f64,
    /// Rolling average response latency; `None` until the first attempt.
    #[serde(default)]
    pub avg_response_ms: Option<f64>,
    #[serde(default)]
    pub total_attempts: u64,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Government or otherwise rate-sensitive site.
    #[serde(default)]
    pub restricted: bool,
    /// Always warm up cookies before the real request.
    #[serde(default)]
    pub needs_warmup: bool,
}

fn default_true() -> bool {
    true
}

/// Weight cap for rolling statistics; older history counts as at most 99 samples.
const ROLLING_WINDOW: u64 = 99;

impl SourceRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target: target.into(),
            source_type,
            credibility_score: 50.0,
            success_rate: 100.0,
            avg_response_ms: None,
            total_attempts: 0,
            last_attempt_at: None,
            active: true,
            regions: Vec::new(),
            topics: Vec::new(),
            restricted: false,
            needs_warmup: false,
        }
    }

    pub fn with_credibility(mut self, score: f64) -> Self {
        self.credibility_score = score;
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate;
        self
    }

    pub fn with_avg_response_ms(mut self, ms: f64) -> Self {
        self.avg_response_ms = Some(ms);
        self
    }

    pub fn with_last_attempt(mut self, at: DateTime<Utc>) -> Self {
        self.last_attempt_at = Some(at);
        self
    }

    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Clamp scores into range. Applied at every persistence boundary.
    pub fn normalized(mut self) -> Self {
        self.credibility_score = clamp_score(self.credibility_score);
        self.success_rate = clamp_score(self.success_rate);
        self.avg_response_ms = self.avg_response_ms.map(|ms| ms.max(0.0));
        self
    }

    /// Sources without any region/topic affinity match every filter.
    pub fn matches(&self, filter: &SourceFilter) -> bool {
        fn affinity(values: &[String], wanted: Option<&str>) -> bool {
            match wanted {
                None => true,
                Some(_) if values.is_empty() => true,
                Some(w) => values.iter().any(|v| v.eq_ignore_ascii_case(w)),
            }
        }
        affinity(&self.regions, filter.region.as_deref())
            && affinity(&self.topics, filter.topic.as_deref())
    }

    /// True when the source was attempted within the last 24 hours.
    pub fn is_recently_active(&self, now: DateTime<Utc>) -> bool {
        self.last_attempt_at
            .is_some_and(|at| now.signed_duration_since(at) <= TimeDelta::hours(24))
    }

    /// Merge one attempt into the rolling statistics.
    pub fn apply_attempt(&mut self, metrics: &AttemptMetrics) {
        let weight = self.total_attempts.min(ROLLING_WINDOW) as f64;
        let sample = if metrics.success { 100.0 } else { 0.0 };
        self.success_rate = clamp_score((self.success_rate * weight + sample) / (weight + 1.0));

        let elapsed = metrics.elapsed_ms as f64;
        self.avg_response_ms = Some(match self.avg_response_ms {
            Some(avg) if self.total_attempts > 0 => (avg * weight + elapsed) / (weight + 1.0),
            _ => elapsed,
        });

        self.total_attempts += 1;
        self.last_attempt_at = Some(metrics.at);
    }
}

/// Clamp a score into `[0, 100]`, mapping NaN to 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Region/topic filter for source selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFilter {
    pub region: Option<String>,
    pub topic: Option<String>,
}

impl SourceFilter {
    pub fn new(region: Option<String>, topic: Option<String>) -> Self {
        Self { region, topic }
    }

    pub fn any() -> Self {
        Self::default()
    }
}

impl fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "region={} topic={}",
            self.region.as_deref().unwrap_or("*"),
            self.topic.as_deref().unwrap_or("*")
        )
    }
}

/// Routing priority bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Primary,
    Secondary,
    Emergency,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Primary, Tier::Secondary, Tier::Emergency];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Secondary => "secondary",
            Tier::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(Tier::Primary),
            "secondary" => Ok(Tier::Secondary),
            "emergency" => Ok(Tier::Emergency),
            _ => Err(format!("Unknown tier: {s}")),
        }
    }
}

/// What a cached payload represents; drives its default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    ArticleSet,
    Feed,
    RawPage,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::ArticleSet => "article-set",
            ContentKind::Feed => "feed",
            ContentKind::RawPage => "raw-page",
        }
    }

    pub fn default_ttl(&self) -> Duration {
        match self {
            ContentKind::ArticleSet => Duration::from_secs(24 * 60 * 60),
            ContentKind::Feed => Duration::from_secs(2 * 60 * 60),
            ContentKind::RawPage => Duration::from_secs(60 * 60),
        }
    }
}

/// One extracted content item. Opaque to the acquisition engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub source_id: String,
    pub url: String,
    pub title: Option<String>,
    pub body: String,
    pub kind: ContentKind,
    pub fetched_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn size_bytes(&self) -> usize {
        self.url.len() + self.title.as_ref().map_or(0, String::len) + self.body.len()
    }
}

/// How a payload was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    /// Plain GET with rotated identity headers.
    Direct,
    /// GET preceded by a cookie warm-up request to the site root.
    WarmedUp,
    /// Partial body obtained through a byte-range request after a block.
    RangeFallback,
    /// Fresh cache hit.
    Cache,
    /// Expired cache entry served as a last resort.
    StaleCache,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Direct => "direct",
            FetchMethod::WarmedUp => "warmed_up",
            FetchMethod::RangeFallback => "range_fallback",
            FetchMethod::Cache => "cache",
            FetchMethod::StaleCache => "stale_cache",
        }
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input to one logical fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub target: String,
    pub restricted: bool,
    pub needs_warmup: bool,
}

impl FetchRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            restricted: false,
            needs_warmup: false,
        }
    }

    /// Request for an ad-hoc target; restriction is inferred from the host.
    pub fn for_target(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            restricted: is_restricted_target(&target),
            target,
            needs_warmup: false,
        }
    }

    pub fn for_source(source: &SourceRecord) -> Self {
        Self {
            target: source.target.clone(),
            restricted: source.restricted || is_restricted_target(&source.target),
            needs_warmup: source.needs_warmup,
        }
    }
}

/// A payload that passed content validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub target: String,
    pub body: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub method: FetchMethod,
    /// Number of network attempts spent, including the successful one.
    pub attempts: u32,
}

/// Which request shape an accessibility probe ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    Head,
    RangedGet,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMethod::Head => "head",
            ProbeMethod::RangedGet => "ranged_get",
        }
    }
}

/// Result of a cheap reachability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub method: ProbeMethod,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Per-attempt metrics reported back to the source store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptMetrics {
    pub source_id: String,
    pub success: bool,
    pub method: Option<FetchMethod>,
    pub elapsed_ms: u64,
    pub at: DateTime<Utc>,
}

impl AttemptMetrics {
    pub fn success(source_id: &str, method: FetchMethod, elapsed: Duration) -> Self {
        Self {
            source_id: source_id.to_string(),
            success: true,
            method: Some(method),
            elapsed_ms: elapsed.as_millis() as u64,
            at: Utc::now(),
        }
    }

    pub fn failure(source_id: &str, elapsed: Duration) -> Self {
        Self {
            source_id: source_id.to_string(),
            success: false,
            method: None,
            elapsed_ms: elapsed.as_millis() as u64,
            at: Utc::now(),
        }
    }
}

/// Structured log entry for fatal or unexpected errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl EngineEvent {
    pub fn from_error(source_id: Option<&str>, error: &AppError) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.map(str::to_string),
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// One failure recorded while serving a scrape request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub source_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl OutcomeError {
    pub fn new(source_id: Option<&str>, error: &AppError) -> Self {
        Self {
            source_id: source_id.map(str::to_string),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Cache involvement in a scrape outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheProvenance {
    /// Result was served from the cache.
    pub used: bool,
    /// Served entry had already expired.
    pub stale: bool,
    /// Freshly fetched result was written to the cache.
    pub stored: bool,
    /// Age of the served entry.
    pub age_secs: Option<i64>,
}

/// Structured result of one scrape request. Always produced, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub request_id: Uuid,
    pub success: bool,
    pub items: Vec<ContentItem>,
    pub method: Option<FetchMethod>,
    pub tier: Option<Tier>,
    pub source_id: Option<String>,
    pub cache: CacheProvenance,
    pub errors: Vec<OutcomeError>,
    pub elapsed_ms: u64,
}

impl ScrapeOutcome {
    /// Kind of the final error, if the request failed.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        if self.success {
            None
        } else {
            self.errors.last().map(|e| e.kind)
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceRecord {
        SourceRecord::new("s1", "Example", "https://example.com", SourceType::Regional)
    }

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_source_type_roundtrip() {
        for t in [
            SourceType::Hyperlocal,
            SourceType::Regional,
            SourceType::National,
        ] {
            assert_eq!(t.as_str().parse::<SourceType>().unwrap(), t);
        }
        assert!("galactic".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_normalized_clamps_scores() {
        let s = source()
            .with_credibility(140.0)
            .with_success_rate(-3.0)
            .normalized();
        assert_eq!(s.credibility_score, 100.0);
        assert_eq!(s.success_rate, 0.0);
    }

    #[test]
    fn test_filter_matching() {
        let s = source().with_regions(["Ohio"]).with_topics(["politics"]);
        assert!(s.matches(&SourceFilter::any()));
        assert!(s.matches(&SourceFilter::new(Some("ohio".into()), None)));
        assert!(!s.matches(&SourceFilter::new(Some("Texas".into()), None)));
        assert!(!s.matches(&SourceFilter::new(None, Some("sports".into()))));

        let unscoped = source();
        assert!(unscoped.matches(&SourceFilter::new(Some("Texas".into()), Some("x".into()))));
    }

    #[test]
    fn test_recently_active() {
        let now = Utc::now();
        assert!(!source().is_recently_active(now));
        assert!(
            source()
                .with_last_attempt(now - TimeDelta::hours(2))
                .is_recently_active(now)
        );
        assert!(
            !source()
                .with_last_attempt(now - TimeDelta::hours(30))
                .is_recently_active(now)
        );
    }

    #[test]
    fn test_apply_attempt_rolls_statistics() {
        let mut s = source().with_success_rate(100.0);
        s.apply_attempt(&AttemptMetrics::failure("s1", Duration::from_millis(400)));
        // First sample has zero history weight.
        assert_eq!(s.success_rate, 0.0);
        assert_eq!(s.avg_response_ms, Some(400.0));
        assert_eq!(s.total_attempts, 1);

        s.apply_attempt(&AttemptMetrics::success(
            "s1",
            FetchMethod::Direct,
            Duration::from_millis(200),
        ));
        assert_eq!(s.success_rate, 50.0);
        assert_eq!(s.avg_response_ms, Some(300.0));
        assert_eq!(s.total_attempts, 2);
        assert!(s.last_attempt_at.is_some());
    }

    #[test]
    fn test_fetch_request_restriction() {
        assert!(FetchRequest::for_target("https://www.cdc.gov/flu").restricted);
        assert!(!FetchRequest::for_target("https://news.example.com").restricted);
        assert!(FetchRequest::for_source(&source().restricted()).restricted);
        assert!(!FetchRequest::for_source(&source()).restricted);
    }

    #[test]
    fn test_default_ttls() {
        assert_eq!(
            ContentKind::ArticleSet.default_ttl(),
            Duration::from_secs(86_400)
        );
        assert_eq!(ContentKind::Feed.default_ttl(), Duration::from_secs(7_200));
        assert_eq!(ContentKind::RawPage.default_ttl(), Duration::from_secs(3_600));
    }

    #[test]
    fn test_source_record_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": "a",
            "name": "A",
            "target": "https://a.example",
            "source_type": "national",
            "credibility_score": 80.0,
            "success_rate": 90.0
        });
        let s: SourceRecord = serde_json::from_value(json).unwrap();
        assert!(s.active);
        assert!(s.regions.is_empty());
        assert_eq!(s.avg_response_ms, None);
    }
}
