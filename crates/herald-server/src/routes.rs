use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use herald_core::AppError;
use herald_core::models::Tier;
use herald_core::scraper::ScrapeRequest;

use crate::auth::require_api_key;
use crate::dto::{
    HealthResponse, InvalidateResponse, ProbeQuery, ProbeResponse, RefreshResponse,
    ScrapeRequestBody, ScrapeResponse, SystemHealthResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/scrape", post(scrape))
        .route("/v1/system/health", get(system_health))
        .route("/v1/pools/refresh", post(refresh_pools))
        .route("/v1/sources/probe", get(probe_url))
        .route("/v1/sources/{source_id}/probe", post(probe_source))
        .route("/v1/cache/sources/{source_id}", delete(invalidate_source_cache))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/scrape",
    request_body = ScrapeRequestBody,
    responses(
        (status = 200, description = "Content acquired", body = ScrapeResponse),
        (status = 503, description = "All sources exhausted; errors are listed", body = ScrapeResponse),
        (status = 400, description = "Bad request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ScrapeRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut request = ScrapeRequest::new(non_blank(body.region), non_blank(body.topic));
    if let Some(tier) = non_blank(body.preferred_tier) {
        let tier: Tier = tier.parse().map_err(AppError::ParseError)?;
        request = request.with_preferred_tier(tier);
    }

    let outcome = state.scraper.scrape(&request).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((status, axum::Json(ScrapeResponse::from(outcome))))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/pools/refresh",
    responses(
        (status = 200, description = "Pools rebuilt", body = RefreshResponse),
        (status = 500, description = "Source store unavailable", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn refresh_pools(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let filters_refreshed = state.scraper.force_refresh().await?;
    Ok(axum::Json(RefreshResponse { filters_refreshed }))
}

#[utoipa::path(
    get,
    path = "/v1/sources/probe",
    params(ProbeQuery),
    responses(
        (status = 200, description = "Probe result, reachable or not", body = ProbeResponse),
        (status = 400, description = "Bad request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn probe_url(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProbeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let url = url::Url::parse(&query.url)
        .map_err(|e| AppError::ParseError(format!("Invalid url '{}': {e}", query.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::ParseError(format!("Unsupported scheme '{}'", url.scheme())).into());
    }

    let result = state.scraper.probe_target(url.as_str()).await;
    Ok(axum::Json(ProbeResponse::from(result)))
}

#[utoipa::path(
    post,
    path = "/v1/sources/{source_id}/probe",
    params(("source_id" = String, Path, description = "Source identifier")),
    responses(
        (status = 200, description = "Probe result, recorded on the source's circuit", body = ProbeResponse),
        (status = 404, description = "Unknown source", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn probe_source(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.scraper.probe_source(&source_id).await?;
    Ok(axum::Json(ProbeResponse::from(result)))
}

#[utoipa::path(
    delete,
    path = "/v1/cache/sources/{source_id}",
    params(("source_id" = String, Path, description = "Source identifier")),
    responses(
        (status = 200, description = "Cache entries removed", body = InvalidateResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn invalidate_source_cache(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
) -> impl IntoResponse {
    let entries_removed = state.scraper.invalidate_source(&source_id);
    axum::Json(InvalidateResponse {
        source_id,
        entries_removed,
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/system/health",
    responses(
        (status = 200, description = "Pool, circuit and cache statistics", body = SystemHealthResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn system_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.scraper.system_health();
    let status = if snapshot.degraded_circuits.is_empty() {
        "healthy"
    } else {
        "degraded"
    };
    axum::Json(SystemHealthResponse { status, snapshot })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_status = match state.store.health_check().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    let status = if store_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if store_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        },
        store: store_status,
        backend: state.store.backend(),
    };

    (status, axum::Json(response))
}
