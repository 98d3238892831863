use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_core::compute_hash;
use herald_core::models::{ContentItem, OutcomeError, ProbeResult, ScrapeOutcome};
use herald_core::scraper::SystemHealth;

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct ScrapeRequestBody {
    /// Region to cover (matches sources without region affinity too)
    pub region: Option<String>,
    /// Topic to cover
    pub topic: Option<String>,
    /// Preferred tier: "primary", "secondary" or "emergency"
    pub preferred_tier: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ContentItemResponse {
    pub source_id: String,
    pub url: String,
    pub title: Option<String>,
    pub body: String,
    pub kind: String,
    /// SHA-256 of the body, for downstream de-duplication
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl From<ContentItem> for ContentItemResponse {
    fn from(item: ContentItem) -> Self {
        Self {
            content_hash: compute_hash(&item.body),
            source_id: item.source_id,
            url: item.url,
            title: item.title,
            body: item.body,
            kind: item.kind.as_str().to_string(),
            fetched_at: item.fetched_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CacheProvenanceResponse {
    pub used: bool,
    pub stale: bool,
    pub stored: bool,
    pub age_secs: Option<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct OutcomeErrorResponse {
    pub source_id: Option<String>,
    pub kind: String,
    pub message: String,
}

impl From<OutcomeError> for OutcomeErrorResponse {
    fn from(e: OutcomeError) -> Self {
        Self {
            source_id: e.source_id,
            kind: e.kind.to_string(),
            message: e.message,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeResponse {
    pub request_id: Uuid,
    pub success: bool,
    pub source_id: Option<String>,
    pub tier: Option<String>,
    /// direct, warmed_up, range_fallback, cache or stale_cache
    pub method: Option<String>,
    pub cache: CacheProvenanceResponse,
    pub items: Vec<ContentItemResponse>,
    pub errors: Vec<OutcomeErrorResponse>,
    pub elapsed_ms: u64,
}

impl From<ScrapeOutcome> for ScrapeResponse {
    fn from(outcome: ScrapeOutcome) -> Self {
        Self {
            request_id: outcome.request_id,
            success: outcome.success,
            source_id: outcome.source_id,
            tier: outcome.tier.map(|t| t.as_str().to_string()),
            method: outcome.method.map(|m| m.as_str().to_string()),
            cache: CacheProvenanceResponse {
                used: outcome.cache.used,
                stale: outcome.cache.stale,
                stored: outcome.cache.stored,
                age_secs: outcome.cache.age_secs,
            },
            items: outcome.items.into_iter().map(Into::into).collect(),
            errors: outcome.errors.into_iter().map(Into::into).collect(),
            elapsed_ms: outcome.elapsed_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ProbeQuery {
    pub url: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProbeResponse {
    pub url: String,
    pub reachable: bool,
    pub status: Option<u16>,
    /// head or ranged_get
    pub method: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl From<ProbeResult> for ProbeResponse {
    fn from(result: ProbeResult) -> Self {
        Self {
            url: result.target,
            reachable: result.reachable,
            status: result.status,
            method: result.method.as_str().to_string(),
            latency_ms: result.latency_ms,
            error: result.error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RefreshResponse {
    pub filters_refreshed: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct InvalidateResponse {
    pub source_id: String,
    pub entries_removed: usize,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub backend: &'static str,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SystemHealthResponse {
    /// "healthy" when every circuit is closed, otherwise "degraded"
    pub status: &'static str,
    /// Pool, circuit and cache statistics
    #[schema(value_type = Object)]
    pub snapshot: SystemHealth,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
