use chrono::{DateTime, Utc};
use herald_core::error::AppError;
use herald_core::models::{
    AttemptMetrics, EngineEvent, SourceFilter, SourceRecord, clamp_score,
};
use herald_core::traits::SourceStore;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Rolling-statistics weight cap, matching the in-memory store.
const ROLLING_WINDOW: i64 = 99;

/// PostgreSQL-backed source metadata, attempt history and event log.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a source's descriptive fields. Rolling statistics
    /// of an existing row are kept.
    pub async fn upsert(&self, source: &SourceRecord) -> Result<(), AppError> {
        let source = source.clone().normalized();
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, target, source_type, credibility_score, success_rate,
                                 avg_response_ms, active, regions, topics, restricted, needs_warmup)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                target = EXCLUDED.target,
                source_type = EXCLUDED.source_type,
                credibility_score = EXCLUDED.credibility_score,
                active = EXCLUDED.active,
                regions = EXCLUDED.regions,
                topics = EXCLUDED.topics,
                restricted = EXCLUDED.restricted,
                needs_warmup = EXCLUDED.needs_warmup,
                updated_at = NOW()
            "#,
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(&source.target)
        .bind(source.source_type.as_str())
        .bind(source.credibility_score)
        .bind(source.success_rate)
        .bind(source.avg_response_ms)
        .bind(source.active)
        .bind(&source.regions)
        .bind(&source.topics)
        .bind(source.restricted)
        .bind(source.needs_warmup)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<SourceRecord>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!("{SELECT_SOURCE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(SourceRecord::try_from).transpose()
    }

    /// Active sources matching the filter. Sources with no region (or
    /// topic) affinity match every region (or topic).
    pub async fn list_active(&self, filter: &SourceFilter) -> Result<Vec<SourceRecord>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            r#"{SELECT_SOURCE}
            WHERE active
              AND ($1::text IS NULL OR cardinality(regions) = 0
                   OR EXISTS (SELECT 1 FROM unnest(regions) r WHERE lower(r) = lower($1)))
              AND ($2::text IS NULL OR cardinality(topics) = 0
                   OR EXISTS (SELECT 1 FROM unnest(topics) t WHERE lower(t) = lower($2)))
            ORDER BY id
            "#
        ))
        .bind(filter.region.as_deref())
        .bind(filter.topic.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(SourceRecord::try_from).collect()
    }

    /// Merge one attempt into the source's rolling statistics and append it
    /// to the attempt history.
    pub async fn record_attempt(&self, metrics: &AttemptMetrics) -> Result<(), AppError> {
        let sample = if metrics.success { 100.0 } else { 0.0 };
        let elapsed = metrics.elapsed_ms as f64;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // Right-hand sides all read the pre-update row.
        let result = sqlx::query(
            r#"
            UPDATE sources SET
                success_rate = LEAST(100, GREATEST(0,
                    (success_rate * LEAST(total_attempts, $5) + $2) / (LEAST(total_attempts, $5) + 1))),
                avg_response_ms = CASE
                    WHEN avg_response_ms IS NULL OR total_attempts = 0 THEN $3
                    ELSE (avg_response_ms * LEAST(total_attempts, $5) + $3) / (LEAST(total_attempts, $5) + 1)
                END,
                total_attempts = total_attempts + 1,
                last_attempt_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&metrics.source_id)
        .bind(sample)
        .bind(elapsed)
        .bind(metrics.at)
        .bind(ROLLING_WINDOW)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Generic(format!(
                "Unknown source '{}'",
                metrics.source_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO source_attempts (source_id, success, method, elapsed_ms, attempted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&metrics.source_id)
        .bind(metrics.success)
        .bind(metrics.method.map(|m| m.as_str()))
        .bind(metrics.elapsed_ms as i64)
        .bind(metrics.at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    pub async fn log_event(&self, event: &EngineEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO engine_events (id, source_id, kind, message, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.source_id.as_deref())
        .bind(event.kind.as_str())
        .bind(&event.message)
        .bind(event.at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Most recent events, newest first.
    pub async fn recent_events(&self, limit: usize) -> Result<Vec<StoredEvent>, AppError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, source_id, kind, message, occurred_at
            FROM engine_events
            ORDER BY occurred_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

const SELECT_SOURCE: &str = r#"
    SELECT id, name, target, source_type, credibility_score, success_rate, avg_response_ms,
           total_attempts, last_attempt_at, active, regions, topics, restricted, needs_warmup
    FROM sources"#;

/// An event as read back from the log. The kind is kept as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: String,
    name: String,
    target: String,
    source_type: String,
    credibility_score: f64,
    success_rate: f64,
    avg_response_ms: Option<f64>,
    total_attempts: i64,
    last_attempt_at: Option<DateTime<Utc>>,
    active: bool,
    regions: Vec<String>,
    topics: Vec<String>,
    restricted: bool,
    needs_warmup: bool,
}

impl TryFrom<SourceRow> for SourceRecord {
    type Error = AppError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let source_type = row.source_type.parse().map_err(|e: String| {
            AppError::DatabaseError(format!("Source '{}': {e}", row.id))
        })?;

        Ok(SourceRecord {
            id: row.id,
            name: row.name,
            target: row.target,
            source_type,
            credibility_score: clamp_score(row.credibility_score),
            success_rate: clamp_score(row.success_rate),
            avg_response_ms: row.avg_response_ms,
            total_attempts: row.total_attempts.max(0) as u64,
            last_attempt_at: row.last_attempt_at,
            active: row.active,
            regions: row.regions,
            topics: row.topics,
            restricted: row.restricted,
            needs_warmup: row.needs_warmup,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    source_id: Option<String>,
    kind: String,
    message: String,
    occurred_at: DateTime<Utc>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        StoredEvent {
            id: row.id,
            source_id: row.source_id,
            kind: row.kind,
            message: row.message,
            occurred_at: row.occurred_at,
        }
    }
}

// -- Trait implementation --

impl SourceStore for SourceRepository {
    async fn list_active_sources(&self, filter: &SourceFilter) -> Result<Vec<SourceRecord>, AppError> {
        self.list_active(filter).await
    }

    async fn record_attempt(&self, metrics: &AttemptMetrics) -> Result<(), AppError> {
        SourceRepository::record_attempt(self, metrics).await
    }

    async fn log_event(&self, event: &EngineEvent) -> Result<(), AppError> {
        SourceRepository::log_event(self, event).await
    }
}
