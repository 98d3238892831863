//! reqwest-based fetch/retry engine.
//!
//! One [`Fetcher::fetch`] call is one logical fetch: up to
//! `max_retries + 1` sequential attempts with backoff, rotated identities,
//! a byte-range fallback on blocking statuses and optional cookie warm-up.

use std::time::{Duration, Instant};

use chrono::Utc;
use herald_core::error::AppError;
use herald_core::models::{FetchMethod, FetchRequest, FetchedPage, ProbeMethod, ProbeResult};
use herald_core::retry::RetryConfig;
use herald_core::traits::Fetcher;
use herald_core::util::normalize_domain;
use herald_core::validation::validate_content;
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, RANGE, SET_COOKIE};
use reqwest::{Client, Response, StatusCode, redirect};
use url::Url;

use crate::identity::{IDENTITIES, Identity, build_headers, identity_for_attempt};
use crate::warmup::{WarmupRecord, WarmupState, cookie_header};

/// Bytes requested by the byte-range fallback.
pub const RANGE_FALLBACK_BYTES: usize = 16 * 1024;
/// Bytes requested by a ranged accessibility probe.
const PROBE_RANGE_BYTES: usize = 1024;
/// 503/504 responses within one logical fetch after which the server is
/// assumed overloaded and the fetch fails fast.
const OVERLOAD_LIMIT: u32 = 2;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub retry: RetryConfig,
    pub timeout: Duration,
    /// Timeout for government and other restricted hosts.
    pub restricted_timeout: Duration,
    pub range_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(15),
            restricted_timeout: Duration::from_secs(30),
            range_bytes: RANGE_FALLBACK_BYTES,
        }
    }
}

impl FetcherConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, timeout: Duration, restricted: Duration) -> Self {
        self.timeout = timeout;
        self.restricted_timeout = restricted;
        self
    }
}

/// HTTP fetcher with retries and anti-blocking fallbacks.
#[derive(Clone)]
pub struct ResilientFetcher {
    client: Client,
    config: FetcherConfig,
    warmup: WarmupState,
}

/// A response body that came back with a success status.
struct RawPage {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl ResilientFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(5))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            warmup: WarmupState::new(),
        })
    }

    pub fn warmup_state(&self) -> &WarmupState {
        &self.warmup
    }

    fn timeout_for(&self, restricted: bool) -> Duration {
        if restricted {
            self.config.restricted_timeout
        } else {
            self.config.timeout
        }
    }

    fn map_send_error(&self, e: reqwest::Error, timeout: Duration) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(timeout.as_secs())
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else if e.is_body() || e.is_decode() {
            AppError::ContentValidation(format!("Failed to read response body: {e}"))
        } else {
            AppError::NetworkError(e.to_string())
        }
    }

    async fn send(
        &self,
        url: &Url,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Response, AppError> {
        self.client
            .get(url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, timeout))
    }

    async fn read_page(&self, response: Response, timeout: Duration) -> Result<RawPage, AppError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let url = response.url().to_string();

        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(e, timeout))?;

        Ok(RawPage {
            status: status.as_u16(),
            content_type,
            body,
        })
    }

    /// Warm up cookies for the domain of `url`, reusing a recent outcome.
    async fn warm_up(
        &self,
        url: &Url,
        domain: &str,
        identity: &Identity,
        restricted: bool,
        timeout: Duration,
    ) -> Option<String> {
        if let Some(record) = self.warmup.record(domain).await {
            return record.cookie_header;
        }

        let mut root = url.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);

        let headers = build_headers(identity, &root, restricted, None);
        let record = match self.send(&root, headers, timeout).await {
            Ok(response) => {
                let status = response.status().as_u16();
                let cookies = cookie_header(
                    response
                        .headers()
                        .get_all(SET_COOKIE)
                        .iter()
                        .filter_map(|v| v.to_str().ok()),
                );
                let reason = match &cookies {
                    Some(_) => "session cookies harvested".to_string(),
                    None => "root answered without cookies".to_string(),
                };
                WarmupRecord {
                    cookie_header: cookies,
                    last_status: Some(status),
                    reason,
                    updated_at: Utc::now(),
                }
            }
            Err(e) => WarmupRecord {
                cookie_header: None,
                last_status: None,
                reason: format!("warm-up request failed: {e}"),
                updated_at: Utc::now(),
            },
        };

        tracing::debug!(
            domain = %domain,
            status = ?record.last_status,
            has_cookies = record.cookie_header.is_some(),
            reason = %record.reason,
            "Cookie warm-up"
        );
        let cookies = record.cookie_header.clone();
        self.warmup.remember(domain, record).await;
        cookies
    }

    /// Ask for only the first `range_bytes` of the body after a block.
    async fn range_fallback(
        &self,
        url: &Url,
        identity: &Identity,
        restricted: bool,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> Result<RawPage, AppError> {
        let mut headers = build_headers(identity, url, restricted, cookie);
        let range = format!("bytes=0-{}", self.config.range_bytes.saturating_sub(1));
        if let Ok(value) = HeaderValue::from_str(&range) {
            headers.insert(RANGE, value);
        }

        let response = self.send(url, headers, timeout).await?;
        let mut page = self.read_page(response, timeout).await?;
        truncate_at_char_boundary(&mut page.body, self.config.range_bytes);
        validate_content(&page.body)?;
        Ok(page)
    }
}

fn truncate_at_char_boundary(body: &mut String, max: usize) {
    if body.len() <= max {
        return;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
}

fn is_overload(error: &AppError) -> bool {
    matches!(error, AppError::HttpStatus { status: 503 | 504, .. })
}

impl Fetcher for ResilientFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, AppError> {
        let url = Url::parse(&request.target).map_err(|e| {
            AppError::NetworkError(format!("Invalid URL '{}': {e}", request.target))
        })?;
        let domain = normalize_domain(&request.target).unwrap_or_default();
        let restricted = request.restricted;
        let timeout = self.timeout_for(restricted);
        let retry = &self.config.retry;
        let offset = rand::rng().random_range(0..IDENTITIES.len());

        let mut last_error: Option<AppError> = None;
        let mut overloads = 0;

        for attempt in 0..retry.max_attempts() {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt - 1, restricted);
                tracing::debug!(
                    target_url = %request.target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    restricted,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            let identity = identity_for_attempt(offset, attempt);
            let cookie = if request.needs_warmup || self.warmup.needs_warmup(&domain).await {
                self.warm_up(&url, &domain, identity, restricted, timeout)
                    .await
            } else {
                None
            };
            let method = if cookie.is_some() {
                FetchMethod::WarmedUp
            } else {
                FetchMethod::Direct
            };

            let headers = build_headers(identity, &url, restricted, cookie.as_deref());
            let result = match self.send(&url, headers, timeout).await {
                Ok(response) => self.read_page(response, timeout).await,
                Err(e) => Err(e),
            };

            let error = match result.and_then(|page| validate_content(&page.body).map(|()| page)) {
                Ok(page) => {
                    return Ok(FetchedPage {
                        target: request.target.clone(),
                        body: page.body,
                        status: page.status,
                        content_type: page.content_type,
                        method,
                        attempts: attempt + 1,
                    });
                }
                Err(e) => e,
            };

            if error.is_blocking_status() {
                self.warmup.note_block(&domain).await;
                tracing::debug!(target_url = %request.target, error = %error, "Blocked, trying byte-range fallback");
                match self
                    .range_fallback(&url, identity, restricted, cookie.as_deref(), timeout)
                    .await
                {
                    Ok(page) => {
                        tracing::info!(
                            target_url = %request.target,
                            bytes = page.body.len(),
                            "Byte-range fallback succeeded"
                        );
                        return Ok(FetchedPage {
                            target: request.target.clone(),
                            body: page.body,
                            status: page.status,
                            content_type: page.content_type,
                            method: FetchMethod::RangeFallback,
                            attempts: attempt + 1,
                        });
                    }
                    Err(range_error @ AppError::ContentValidation(_)) => {
                        // The partial body told us more than the status did.
                        last_error = Some(range_error);
                        continue;
                    }
                    Err(range_error) => {
                        tracing::debug!(error = %range_error, "Byte-range fallback failed");
                    }
                }
            }

            if is_overload(&error) {
                overloads += 1;
            }
            let fatal = matches!(error, AppError::NetworkError(_)) || overloads >= OVERLOAD_LIMIT;
            tracing::warn!(
                target_url = %request.target,
                attempt = attempt + 1,
                max_attempts = retry.max_attempts(),
                error = %error,
                fatal,
                "Fetch attempt failed"
            );
            if fatal || !error.is_retryable() {
                return Err(error);
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Generic(format!("No fetch attempts made for {}", request.target))
        }))
    }

    async fn probe(&self, request: &FetchRequest) -> ProbeResult {
        let started = Instant::now();
        let restricted = request.restricted;
        let timeout = self.timeout_for(restricted);

        let url = match Url::parse(&request.target) {
            Ok(url) => url,
            Err(e) => {
                return ProbeResult {
                    target: request.target.clone(),
                    reachable: false,
                    status: None,
                    method: ProbeMethod::Head,
                    latency_ms: 0,
                    error: Some(format!("Invalid URL: {e}")),
                };
            }
        };

        let identity = identity_for_attempt(rand::rng().random_range(0..IDENTITIES.len()), 0);
        let head = self
            .client
            .head(url.clone())
            .headers(build_headers(identity, &url, restricted, None))
            .timeout(timeout)
            .send()
            .await;

        let head_error = match head {
            Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                return probe_result(request, &started, ProbeMethod::Head, Some(response.status()), None);
            }
            Ok(response) => format!("HEAD returned {}", response.status().as_u16()),
            Err(e) => self.map_send_error(e, timeout).to_string(),
        };
        tracing::debug!(target_url = %request.target, error = %head_error, "HEAD probe failed, trying ranged GET");

        let mut headers = build_headers(identity, &url, restricted, None);
        if let Ok(value) = HeaderValue::from_str(&format!("bytes=0-{}", PROBE_RANGE_BYTES - 1)) {
            headers.insert(RANGE, value);
        }
        match self.send(&url, headers, timeout).await {
            Ok(response) if response.status().is_success() => {
                probe_result(request, &started, ProbeMethod::RangedGet, Some(response.status()), None)
            }
            Ok(response) => {
                let status = response.status();
                probe_result(
                    request,
                    &started,
                    ProbeMethod::RangedGet,
                    Some(status),
                    Some(format!("{head_error}; ranged GET returned {}", status.as_u16())),
                )
            }
            Err(e) => probe_result(
                request,
                &started,
                ProbeMethod::RangedGet,
                None,
                Some(format!("{head_error}; ranged GET failed: {e}")),
            ),
        }
    }
}

fn probe_result(
    request: &FetchRequest,
    started: &Instant,
    method: ProbeMethod,
    status: Option<StatusCode>,
    error: Option<String>,
) -> ProbeResult {
    ProbeResult {
        target: request.target.clone(),
        reachable: error.is_none(),
        status: status.map(|s| s.as_u16()),
        method,
        latency_ms: started.elapsed().as_millis() as u64,
        error,
    }
}
