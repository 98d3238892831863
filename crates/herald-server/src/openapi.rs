use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Herald API",
        version = "0.1.0",
        description = "Resilient local-news acquisition with circuit breakers, tiered source pools and cache fallback."
    ),
    paths(
        crate::routes::scrape,
        crate::routes::system_health,
        crate::routes::refresh_pools,
        crate::routes::probe_url,
        crate::routes::probe_source,
        crate::routes::invalidate_source_cache,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ScrapeRequestBody,
        crate::dto::ScrapeResponse,
        crate::dto::ContentItemResponse,
        crate::dto::CacheProvenanceResponse,
        crate::dto::OutcomeErrorResponse,
        crate::dto::ProbeResponse,
        crate::dto::RefreshResponse,
        crate::dto::InvalidateResponse,
        crate::dto::HealthResponse,
        crate::dto::SystemHealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "scrape", description = "Content acquisition"),
        (name = "sources", description = "Source pools, probes and cache"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "API key. Set via HERALD_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
