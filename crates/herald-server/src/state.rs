use herald_client::{MarkdownParser, ResilientFetcher};
use herald_core::ResilientScraper;
use herald_db::AnySourceStore;

pub type Scraper = ResilientScraper<ResilientFetcher, MarkdownParser, AnySourceStore>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub scraper: Scraper,
    pub store: AnySourceStore,
    /// Bearer token required on every `/v1` route.
    pub api_key: String,
}
