//! In-process [`SourceStore`] backed by a vector of records.
//!
//! Used by the CLI and server when no database is configured, and by tests.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AppError;
use crate::models::{AttemptMetrics, EngineEvent, SourceFilter, SourceRecord};
use crate::traits::SourceStore;

/// Events kept in memory before the oldest are dropped.
const MAX_EVENTS: usize = 1000;

#[derive(Debug, Default)]
struct StoreInner {
    sources: Vec<SourceRecord>,
    events: Vec<EngineEvent>,
}

#[derive(Clone, Debug, Default)]
pub struct MemorySourceStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemorySourceStore {
    pub fn new(sources: Vec<SourceRecord>) -> Self {
        let sources = sources.into_iter().map(SourceRecord::normalized).collect();
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                sources,
                events: Vec::new(),
            })),
        }
    }

    /// Load sources from a JSON array of [`SourceRecord`]s.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        let sources: Vec<SourceRecord> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), sources = sources.len(), "Loaded source list");
        Ok(Self::new(sources))
    }

    fn lock_inner(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned source store");
            poisoned.into_inner()
        })
    }

    pub fn source(&self, id: &str) -> Option<SourceRecord> {
        self.lock_inner().sources.iter().find(|s| s.id == id).cloned()
    }

    pub fn sources(&self) -> Vec<SourceRecord> {
        self.lock_inner().sources.clone()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.lock_inner().events.clone()
    }

    /// Insert or replace a source by id.
    pub fn upsert(&self, source: SourceRecord) {
        let source = source.normalized();
        let mut inner = self.lock_inner();
        match inner.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source,
            None => inner.sources.push(source),
        }
    }
}

impl SourceStore for MemorySourceStore {
    async fn list_active_sources(
        &self,
        filter: &SourceFilter,
    ) -> Result<Vec<SourceRecord>, AppError> {
        Ok(self
            .lock_inner()
            .sources
            .iter()
            .filter(|s| s.active && s.matches(filter))
            .cloned()
            .collect())
    }

    async fn record_attempt(&self, metrics: &AttemptMetrics) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        let Some(source) = inner.sources.iter_mut().find(|s| s.id == metrics.source_id) else {
            return Err(AppError::Generic(format!(
                "Unknown source: {}",
                metrics.source_id
            )));
        };
        source.apply_attempt(metrics);
        Ok(())
    }

    async fn log_event(&self, event: &EngineEvent) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        if inner.events.len() >= MAX_EVENTS {
            inner.events.remove(0);
        }
        inner.events.push(event.clone());
        Ok(())
    }
}
