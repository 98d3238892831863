pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod pool;
pub mod retry;
pub mod scraper;
pub mod store;
pub mod traits;
pub mod util;
pub mod validation;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cache::{CacheConfig, CacheMetadata, CacheStats, ContentCache, cache_key};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitState, SourceHealth,
};
pub use config::EngineConfig;
pub use error::{AppError, ErrorKind};
pub use maintenance::{
    MaintenanceConfig, MaintenanceEvent, MaintenanceReporter, MaintenanceService,
    TracingMaintenanceReporter,
};
pub use models::{
    ContentItem, ContentKind, FetchMethod, FetchRequest, FetchedPage, ProbeResult, ScrapeOutcome,
    SourceFilter, SourceRecord, SourceType, Tier, compute_hash,
};
pub use pool::{PoolConfig, SourcePoolManager, SourceSelection, quality_score};
pub use retry::RetryConfig;
pub use scraper::{ResilientScraper, ScrapeRequest, ScraperConfig, SystemHealth};
pub use store::MemorySourceStore;
pub use traits::{ContentParser, Fetcher, SourceStore};
pub use validation::validate_content;
