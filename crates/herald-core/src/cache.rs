//! Short-lived store of previously fetched payloads.
//!
//! Serves fresh hits to skip the network entirely, and expired-but-present
//! entries as a last resort when every live source has failed. Expired
//! entries are only removed by [`ContentCache::cleanup`], explicit
//! invalidation, or capacity eviction, which is what makes the stale path
//! possible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::models::{ContentItem, ContentKind};
use crate::util::normalize_target;

/// Configuration for the content cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity; the least recently accessed entry is evicted beyond it.
    /// Zero stores nothing.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

/// Descriptive metadata supplied when storing a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetadata {
    pub source_id: String,
    pub target: String,
    pub kind: ContentKind,
    pub quality_hint: Option<f64>,
}

impl CacheMetadata {
    pub fn new(source_id: impl Into<String>, target: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            source_id: source_id.into(),
            target: target.into(),
            kind,
            quality_hint: None,
        }
    }

    pub fn with_quality_hint(mut self, hint: f64) -> Self {
        self.quality_hint = Some(hint);
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Arc<Vec<ContentItem>>,
    metadata: CacheMetadata,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    size_bytes: usize,
    last_access: DateTime<Utc>,
    /// Monotonic access stamp; orders entries for LRU eviction.
    access_seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// A cache hit handed back to callers.
#[derive(Debug, Clone)]
pub struct CachedContent {
    pub items: Arc<Vec<ContentItem>>,
    pub metadata: CacheMetadata,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub age: Duration,
    /// The entry had passed its TTL when it was read.
    pub expired: bool,
}

/// Cache statistics for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits over total lookups, 0-1.
    pub hit_rate: f64,
    pub oldest_entry_age_secs: Option<u64>,
    pub newest_entry_age_secs: Option<u64>,
    /// Entries past their TTL that have not been swept yet.
    pub expired_entries: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    seq: u64,
}

impl CacheInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Thread-safe content cache keyed by [`cache_key`].
#[derive(Clone)]
pub struct ContentCache {
    config: CacheConfig,
    inner: Arc<Mutex<CacheInner>>,
}

/// Derive the cache key for a source/target pair.
///
/// `"{source_id}:{first 16 hex chars of SHA-256(normalized target)}"`.
/// Two pairs mapping to the same key share one slot; the later store wins.
pub fn cache_key(source_id: &str, target: &str) -> String {
    let digest = crate::models::compute_hash(&normalize_target(target));
    format!("{source_id}:{}", &digest[..16])
}

enum Freshness {
    /// Expired entries are misses.
    Fresh,
    /// Expired entries are served.
    AllowStale,
}

impl ContentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(CacheInner::default())),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cache mutex");
            poisoned.into_inner()
        })
    }

    /// Store a payload. `ttl` defaults to the content kind's TTL.
    pub fn store(
        &self,
        key: &str,
        items: Vec<ContentItem>,
        metadata: CacheMetadata,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or_else(|| metadata.kind.default_ttl());
        let ttl = TimeDelta::from_std(ttl)
            .unwrap_or(TimeDelta::MAX)
            .max(TimeDelta::milliseconds(1));
        let now = Utc::now();
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let size_bytes = items.iter().map(ContentItem::size_bytes).sum();

        if self.config.max_entries == 0 {
            tracing::debug!(key = %key, "Cache has no capacity, not storing");
            return;
        }

        let mut inner = self.lock_inner();

        if !inner.entries.contains_key(key) {
            while inner.entries.len() >= self.config.max_entries {
                let Some(victim) = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.access_seq)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                tracing::debug!(key = %victim, "Evicting least recently accessed cache entry");
                inner.entries.remove(&victim);
            }
        }

        let access_seq = inner.next_seq();
        if inner.entries.contains_key(key) {
            tracing::debug!(key = %key, "Overwriting existing cache entry");
        }
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                payload: Arc::new(items),
                metadata,
                stored_at: now,
                expires_at,
                size_bytes,
                last_access: now,
                access_seq,
            },
        );
    }

    /// Unexpired entry for `key`.
    pub fn get(&self, key: &str) -> Option<CachedContent> {
        self.lookup(key, None, Freshness::Fresh)
    }

    /// Unexpired entry for `key` that is also no older than `max_age`.
    pub fn get_fresh(&self, key: &str, max_age: Option<Duration>) -> Option<CachedContent> {
        self.lookup(key, max_age, Freshness::Fresh)
    }

    /// Entry for `key` no older than `max_age`, expired or not.
    pub fn get_stale(&self, key: &str, max_age: Duration) -> Option<CachedContent> {
        self.lookup(key, Some(max_age), Freshness::AllowStale)
    }

    fn lookup(
        &self,
        key: &str,
        max_age: Option<Duration>,
        freshness: Freshness,
    ) -> Option<CachedContent> {
        let now = Utc::now();
        let mut inner = self.lock_inner();
        let seq = inner.next_seq();

        let hit = match inner.entries.get_mut(key) {
            Some(entry) => {
                let expired = entry.is_expired(now);
                let age = entry.age(now);
                let usable = match freshness {
                    Freshness::Fresh => !expired,
                    Freshness::AllowStale => true,
                } && max_age.is_none_or(|max| age <= max);

                if usable {
                    entry.last_access = now;
                    entry.access_seq = seq;
                    Some(CachedContent {
                        items: Arc::clone(&entry.payload),
                        metadata: entry.metadata.clone(),
                        stored_at: entry.stored_at,
                        expires_at: entry.expires_at,
                        last_access: entry.last_access,
                        age,
                        expired,
                    })
                } else {
                    None
                }
            }
            None => None,
        };

        if hit.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        hit
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.lock_inner();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock_inner().entries.remove(key).is_some()
    }

    /// Remove every entry belonging to one source. Returns the number removed.
    pub fn invalidate_source(&self, source_id: &str) -> usize {
        let mut inner = self.lock_inner();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| e.metadata.source_id != source_id);
        let removed = before - inner.entries.len();
        tracing::info!(%source_id, removed, "Invalidated cached content for source");
        removed
    }

    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let inner = self.lock_inner();
        let lookups = inner.hits + inner.misses;
        let ages = inner.entries.values().map(|e| e.age(now).as_secs());

        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.entries.values().map(|e| e.size_bytes).sum(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            oldest_entry_age_secs: ages.clone().max(),
            newest_entry_age_secs: ages.min(),
            expired_entries: inner.entries.values().filter(|e| e.is_expired(now)).count(),
        }
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
