pub mod config;
pub mod database;
pub mod source_repository;
pub mod store;

pub use config::DatabaseConfig;
pub use database::Database;
pub use source_repository::{SourceRepository, StoredEvent};
pub use store::AnySourceStore;
