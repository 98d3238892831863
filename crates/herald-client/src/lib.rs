pub mod fetcher;
pub mod identity;
pub mod parser;
pub mod warmup;

pub use fetcher::{FetcherConfig, ResilientFetcher};
pub use parser::MarkdownParser;
pub use warmup::{WarmupRecord, WarmupState};
