use std::path::Path;

use herald_core::error::AppError;
use herald_core::models::{AttemptMetrics, EngineEvent, SourceFilter, SourceRecord};
use herald_core::store::MemorySourceStore;
use herald_core::traits::SourceStore;

use crate::config::DatabaseConfig;
use crate::database::Database;

/// Source store chosen at startup: PostgreSQL, or a JSON source list held
/// in memory.
#[derive(Clone)]
pub enum AnySourceStore {
    Postgres(Database),
    Memory(MemorySourceStore),
}

impl AnySourceStore {
    /// Use `sources_file` when given, otherwise connect via `DATABASE_URL`.
    pub async fn open(sources_file: Option<&Path>) -> Result<Self, AppError> {
        match sources_file {
            Some(path) => Ok(Self::Memory(MemorySourceStore::from_file(path)?)),
            None => {
                let config = DatabaseConfig::from_env().map_err(|_| {
                    AppError::ConfigError(
                        "No source list: set HERALD_SOURCES_FILE or DATABASE_URL".into(),
                    )
                })?;
                let db = Database::connect(&config).await?;
                db.migrate().await?;
                Ok(Self::Postgres(db))
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AnySourceStore::Postgres(_) => "postgres",
            AnySourceStore::Memory(_) => "memory",
        }
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        match self {
            AnySourceStore::Postgres(db) => db.health_check().await,
            AnySourceStore::Memory(_) => Ok(()),
        }
    }
}

impl SourceStore for AnySourceStore {
    async fn list_active_sources(&self, filter: &SourceFilter) -> Result<Vec<SourceRecord>, AppError> {
        match self {
            AnySourceStore::Postgres(db) => db.source_repo().list_active(filter).await,
            AnySourceStore::Memory(store) => store.list_active_sources(filter).await,
        }
    }

    async fn record_attempt(&self, metrics: &AttemptMetrics) -> Result<(), AppError> {
        match self {
            AnySourceStore::Postgres(db) => db.source_repo().record_attempt(metrics).await,
            AnySourceStore::Memory(store) => store.record_attempt(metrics).await,
        }
    }

    async fn log_event(&self, event: &EngineEvent) -> Result<(), AppError> {
        match self {
            AnySourceStore::Postgres(db) => db.source_repo().log_event(event).await,
            AnySourceStore::Memory(store) => store.log_event(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use herald_core::models::SourceType;

    use super::*;

    #[tokio::test]
    async fn test_memory_backend_delegates() {
        let store = AnySourceStore::Memory(MemorySourceStore::new(vec![SourceRecord::new(
            "gazette",
            "Gazette",
            "https://gazette.example",
            SourceType::Hyperlocal,
        )]));
        assert_eq!(store.backend(), "memory");
        store.health_check().await.unwrap();

        let sources = store.list_active_sources(&SourceFilter::any()).await.unwrap();
        assert_eq!(sources.len(), 1);

        let err = store
            .record_attempt(&AttemptMetrics::failure("ghost", std::time::Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Generic(_)));
    }
}
