//! Browser identities rotated across attempts, and the header sets built
//! from them.

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, HeaderMap, HeaderName, HeaderValue, ORIGIN,
    REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use url::Url;

/// One realistic browser fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub mobile: bool,
}

pub const IDENTITIES: [Identity; 6] = [
    Identity {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
        mobile: false,
    },
    Identity {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
        accept_language: "en-US,en;q=0.8",
        mobile: false,
    },
    Identity {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
        accept_language: "en-US,en;q=0.5",
        mobile: false,
    },
    Identity {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0",
        accept_language: "en-GB,en;q=0.9,en-US;q=0.8",
        mobile: false,
    },
    Identity {
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
        accept_language: "en-US,en;q=0.9",
        mobile: true,
    },
    Identity {
        user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Mobile Safari/537.36",
        accept_language: "en-US,en;q=0.9",
        mobile: true,
    },
];

/// Identity for attempt `attempt`, counting round-robin from `offset`.
pub fn identity_for_attempt(offset: usize, attempt: u32) -> &'static Identity {
    &IDENTITIES[(offset + attempt as usize) % IDENTITIES.len()]
}

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Request headers for `identity` against `url`.
///
/// Restricted sites get a minimal set: no Referer/Origin and no fetch
/// metadata, which some government WAFs score as bot heuristics.
pub fn build_headers(
    identity: &Identity,
    url: &Url,
    restricted: bool,
    cookie: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(identity.user_agent));
    headers.insert(ACCEPT, HeaderValue::from_static(HTML_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(identity.accept_language),
    );

    if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(c).ok()) {
        headers.insert(COOKIE, value);
    }

    if restricted {
        return headers;
    }

    let origin = url.origin().ascii_serialization();
    if let Ok(value) = HeaderValue::from_str(&format!("{origin}/")) {
        headers.insert(REFERER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(ORIGIN, value);
    }
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    if identity.mobile {
        headers.insert(
            HeaderName::from_static("sec-ch-ua-mobile"),
            HeaderValue::from_static("?1"),
        );
    }
    headers
}
