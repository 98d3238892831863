use url::Url;

/// Normalize a fetch target for cache keying.
///
/// Lowercases scheme and host, strips a leading `www.`, drops the fragment
/// and any trailing `/` on the path. Unparseable input is trimmed and
/// lowercased instead.
pub fn normalize_target(target: &str) -> String {
    let Ok(url) = Url::parse(target.trim()) else {
        return target.trim().to_lowercase();
    };
    let host = url.host_str().map(strip_www).unwrap_or_default();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let path = url.path().trim_end_matches('/');
    let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
    format!("{}://{host}{port}{path}{query}", url.scheme())
}

/// Host of a URL without a leading `www.`, used to key per-domain state.
pub fn normalize_domain(target: &str) -> Option<String> {
    let url = Url::parse(target.trim()).ok()?;
    url.host_str().map(strip_www)
}

fn strip_www(host: &str) -> String {
    let host = host.to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Second-level labels that mark a government domain under a country code,
/// e.g. `example.gov.uk`, `example.gob.mx`, `example.gouv.fr`.
const GOVERNMENT_LABELS: [&str; 3] = ["gov", "gob", "gouv"];

/// True for government and military hosts, which get gentler request pacing.
pub fn is_restricted_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    match labels.as_slice() {
        [.., "gov"] | [.., "mil"] => true,
        [.., second, tld] if tld.len() == 2 => GOVERNMENT_LABELS.contains(second),
        _ => false,
    }
}

/// Whether a fetch target points at a restricted host.
pub fn is_restricted_target(target: &str) -> bool {
    normalize_domain(target).is_some_and(|h| is_restricted_host(&h))
}
