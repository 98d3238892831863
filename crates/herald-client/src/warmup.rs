//! Per-domain cookie warm-up state.
//!
//! Keyed by normalized domain (leading `www.` stripped). Warm-up outcomes,
//! failures included, are remembered for a short window so the root request
//! is not repeated on every attempt.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::Entry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};

/// How long a warm-up outcome is reused.
pub const WARMUP_TTL: Duration = Duration::from_secs(60);
/// Window in which blocks are counted towards dynamic flagging.
pub const BLOCK_WINDOW: Duration = Duration::from_secs(10 * 60);
/// Blocks within [`BLOCK_WINDOW`] that flag a domain for warm-up.
pub const BLOCKS_BEFORE_WARMUP: usize = 2;
/// How long a dynamically flagged domain keeps warming up.
const FLAG_TTL: Duration = Duration::from_secs(60 * 60);

const MAX_DOMAINS: u64 = 10_000;

/// Outcome of the last warm-up against a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupRecord {
    /// `name=value` pairs harvested from `Set-Cookie`, joined for a `Cookie` header.
    pub cookie_header: Option<String>,
    pub last_status: Option<u16>,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct WarmupState {
    records: Cache<String, WarmupRecord>,
    blocks: Cache<String, Vec<Instant>>,
    flagged: Cache<String, ()>,
}

impl Default for WarmupState {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmupState {
    pub fn new() -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(MAX_DOMAINS)
                .time_to_live(WARMUP_TTL)
                .build(),
            blocks: Cache::builder()
                .max_capacity(MAX_DOMAINS)
                .time_to_live(BLOCK_WINDOW)
                .build(),
            flagged: Cache::builder()
                .max_capacity(MAX_DOMAINS)
                .time_to_live(FLAG_TTL)
                .build(),
        }
    }

    /// Last warm-up outcome for `domain`, if still inside the reuse window.
    pub async fn record(&self, domain: &str) -> Option<WarmupRecord> {
        self.records.get(domain).await
    }

    pub async fn remember(&self, domain: &str, record: WarmupRecord) {
        self.records.insert(domain.to_string(), record).await;
    }

    /// Count a blocking response. Returns true once the domain is flagged.
    pub async fn note_block(&self, domain: &str) -> bool {
        let now = Instant::now();
        let outcome = self
            .blocks
            .entry(domain.to_string())
            .and_compute_with(|existing| {
                let mut recent = existing.map(Entry::into_value).unwrap_or_default();
                recent.retain(|at| now.duration_since(*at) < BLOCK_WINDOW);
                recent.push(now);
                std::future::ready(Op::Put(recent))
            })
            .await;
        let count = match outcome {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => entry.value().len(),
            _ => 0,
        };

        if count >= BLOCKS_BEFORE_WARMUP {
            if !self.flagged.contains_key(domain) {
                tracing::info!(domain = %domain, blocks = count, "Flagging domain for cookie warm-up");
            }
            self.flagged.insert(domain.to_string(), ()).await;
            true
        } else {
            false
        }
    }

    pub async fn needs_warmup(&self, domain: &str) -> bool {
        self.flagged.contains_key(domain)
    }
}

/// Join the `name=value` part of each `Set-Cookie` value into one `Cookie` header.
pub fn cookie_header<'a>(set_cookies: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let pairs: Vec<&str> = set_cookies
        .into_iter()
        .filter_map(|raw| raw.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('=') && !pair.starts_with('='))
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}
