//! Safe evidence fetching — SSRF-guarded, size-capped, retried
//!
//! Fetches license-evidence URLs with the paranoia they deserve:
//!
//! - scheme must be http/https and the hostname must not resolve to a
//!   private, loopback, or link-local address — checked again on every
//!   redirect hop, so an innocent public URL cannot bounce the fetcher
//!   into the internal network
//! - responses are streamed against a hard byte cap (checked both via
//!   `Content-Length` and while streaming)
//! - transient failures retry with exponential backoff; security failures
//!   (blocked URL, oversized body) fail fast and are never retried
//! - concurrent fetches of an identical `(url, headers, limits)` key share
//!   one in-flight request; later callers block and receive a copy

use crate::redact::SecretRedactor;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use url::Url;

const MAX_REDIRECTS: usize = 5;
const MAX_BACKOFF_SECS: f64 = 30.0;
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Typed fetch result — expected failure modes are values, not errors.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ok {
        bytes: Vec<u8>,
        content_type: String,
        http_status: u16,
    },
    /// URL or a redirect hop failed the SSRF guard. Never retried.
    BlockedUrl { reason: String },
    /// Response exceeded the byte cap. Never retried.
    TooLarge { limit: u64 },
    /// Network or HTTP failure after retries were exhausted (or a
    /// non-retryable status).
    Error {
        http_status: Option<u16>,
        message: String,
    },
}

impl FetchOutcome {
    /// Canonical status string persisted in snapshots and queue rows.
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::BlockedUrl { .. } => "blocked_url",
            Self::TooLarge { .. } => "response_too_large",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Outcome plus per-request accounting.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub outcome: FetchOutcome,
    /// Number of HTTP attempts actually issued (0 when blocked up front).
    pub attempts: u32,
}

/// Retry/size limits for a single fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLimits {
    pub max_bytes: u64,
    pub max_retries: u32,
    /// Base for exponential backoff, in seconds (`base^attempt`, capped).
    pub backoff_base_secs: f64,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_bytes: 4 * 1024 * 1024,
            max_retries: 3,
            backoff_base_secs: 2.0,
        }
    }
}

/// Fetcher construction options.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Permit private/loopback destinations (test harnesses only).
    pub allow_private_networks: bool,
    /// Whether HTTP 429 is treated as transient and retried.
    pub retry_rate_limited: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "greenlit-evidence/0.3".to_string(),
            timeout_secs: 30,
            allow_private_networks: false,
            retry_rate_limited: true,
        }
    }
}

/// Key identifying one logical fetch for single-flight purposes. Covers
/// the full limit set: callers with different retry budgets must not
/// share a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FetchKey {
    url: String,
    headers: Vec<(String, String)>,
    max_bytes: u64,
    max_retries: u32,
    /// `backoff_base_secs` keyed by bit pattern (f64 is not `Hash`).
    backoff_base_bits: u64,
}

impl FetchKey {
    fn new(url: &str, headers: &BTreeMap<String, String>, limits: &FetchLimits) -> Self {
        Self {
            url: url.to_string(),
            headers: headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            max_bytes: limits.max_bytes,
            max_retries: limits.max_retries,
            backoff_base_bits: limits.backoff_base_secs.to_bits(),
        }
    }
}

/// Wait-handle for one in-flight fetch: the first requester fills the
/// slot and notifies, later requesters block on the condvar.
struct InFlight {
    slot: Mutex<Option<FetchResult>>,
    done: Condvar,
}

/// SSRF-guarded, size-capped, single-flight evidence fetcher.
pub struct EvidenceFetcher {
    client: reqwest::blocking::Client,
    config: FetcherConfig,
    redactor: SecretRedactor,
    cache: Mutex<HashMap<FetchKey, Arc<InFlight>>>,
}

impl EvidenceFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            // Redirects are followed manually so each hop passes the guard.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("HTTP client construction cannot fail with static options");

        Self {
            client,
            config,
            redactor: SecretRedactor::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `url` with the given headers and limits.
    ///
    /// Concurrent callers with an identical `(url, headers, limits)` key
    /// share a single network request; each receives its own copy of the
    /// result. Results stay cached for the lifetime of the fetcher (one
    /// classification run), so many targets sharing a terms-of-service URL
    /// cost one request total.
    pub fn fetch(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        limits: &FetchLimits,
    ) -> FetchResult {
        let key = FetchKey::new(url, headers, limits);

        let (flight, leader) = {
            let mut cache = self.cache.lock().expect("fetch cache poisoned");
            match cache.get(&key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let flight = Arc::new(InFlight {
                        slot: Mutex::new(None),
                        done: Condvar::new(),
                    });
                    cache.insert(key, Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if leader {
            let result = self.fetch_with_retries(url, headers, limits);
            let mut slot = flight.slot.lock().expect("in-flight slot poisoned");
            *slot = Some(result.clone());
            flight.done.notify_all();
            result
        } else {
            let mut slot = flight.slot.lock().expect("in-flight slot poisoned");
            while slot.is_none() {
                slot = flight.done.wait(slot).expect("in-flight wait poisoned");
            }
            slot.as_ref().cloned().expect("slot filled before notify")
        }
    }

    fn fetch_with_retries(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        limits: &FetchLimits,
    ) -> FetchResult {
        let mut attempts = 0u32;
        let mut round = 0u32;

        loop {
            let outcome = self.fetch_once(url, headers, limits, &mut attempts);

            let retryable = match &outcome {
                FetchOutcome::Ok { .. } => false,
                // Security failures fail fast.
                FetchOutcome::BlockedUrl { .. } | FetchOutcome::TooLarge { .. } => false,
                FetchOutcome::Error { http_status, .. } => match http_status {
                    Some(status) if *status >= 500 => true,
                    Some(429) => self.config.retry_rate_limited,
                    Some(_) => false,
                    // Connection-level failure.
                    None => true,
                },
            };

            if !retryable || round >= limits.max_retries {
                return FetchResult { outcome, attempts };
            }

            let backoff = limits
                .backoff_base_secs
                .powi(round as i32 + 1)
                .min(MAX_BACKOFF_SECS);
            tracing::debug!(
                url = %self.redactor.redact_url(url),
                attempt = attempts,
                backoff_secs = backoff,
                "transient fetch failure, backing off"
            );
            std::thread::sleep(Duration::from_secs_f64(backoff));
            round += 1;
        }
    }

    /// One attempt: follow redirects manually, validating every hop.
    fn fetch_once(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        limits: &FetchLimits,
        attempts: &mut u32,
    ) -> FetchOutcome {
        let mut current = url.to_string();

        for _hop in 0..=MAX_REDIRECTS {
            if let Err(reason) = self.validate_url(&current) {
                return FetchOutcome::BlockedUrl { reason };
            }

            let mut request = self.client.get(&current);
            for (name, value) in headers {
                request = request.header(name, value);
            }

            *attempts += 1;
            let response = match request.send() {
                Ok(r) => r,
                Err(e) => {
                    return FetchOutcome::Error {
                        http_status: None,
                        message: self.redactor.redact_text(&e.to_string()),
                    }
                }
            };

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok());
                match location {
                    Some(loc) => {
                        current = match Url::parse(&current).and_then(|base| base.join(loc)) {
                            Ok(next) => next.to_string(),
                            Err(e) => {
                                return FetchOutcome::Error {
                                    http_status: Some(status.as_u16()),
                                    message: format!("unparseable redirect location: {}", e),
                                }
                            }
                        };
                        continue;
                    }
                    None => {
                        return FetchOutcome::Error {
                            http_status: Some(status.as_u16()),
                            message: "redirect without Location header".to_string(),
                        }
                    }
                }
            }

            if !status.is_success() {
                return FetchOutcome::Error {
                    http_status: Some(status.as_u16()),
                    message: format!("HTTP {} for evidence URL", status.as_u16()),
                };
            }

            // Cap check via Content-Length before reading a byte.
            if let Some(declared) = response.content_length() {
                if declared > limits.max_bytes {
                    return FetchOutcome::TooLarge {
                        limit: limits.max_bytes,
                    };
                }
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            let http_status = status.as_u16();

            return match read_capped(response, limits.max_bytes) {
                Ok(bytes) => FetchOutcome::Ok {
                    bytes,
                    content_type,
                    http_status,
                },
                Err(CapError::Exceeded) => FetchOutcome::TooLarge {
                    limit: limits.max_bytes,
                },
                Err(CapError::Io(e)) => FetchOutcome::Error {
                    http_status: Some(http_status),
                    message: self.redactor.redact_text(&e.to_string()),
                },
            };
        }

        FetchOutcome::Error {
            http_status: None,
            message: format!("more than {} redirects", MAX_REDIRECTS),
        }
    }

    /// SSRF guard: http/https only, destination must not resolve to a
    /// private, loopback, link-local, or unspecified address.
    fn validate_url(&self, url: &str) -> Result<(), String> {
        let parsed = Url::parse(url).map_err(|e| format!("invalid URL: {}", e))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(format!("scheme '{}' not allowed", other)),
        }

        if self.config.allow_private_networks {
            return Ok(());
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| "URL has no host".to_string())?;
        let port = parsed.port_or_known_default().unwrap_or(443);

        // Literal IPs are checked directly; hostnames are resolved and
        // every returned address must be public.
        if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
            return if is_private_address(&ip) {
                Err(format!("address {} is private or local", ip))
            } else {
                Ok(())
            };
        }

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| format!("DNS resolution failed for {}: {}", host, e))?;

        for addr in addrs {
            if is_private_address(&addr.ip()) {
                return Err(format!(
                    "host {} resolves to private or local address {}",
                    host,
                    addr.ip()
                ));
            }
        }
        Ok(())
    }
}

enum CapError {
    Exceeded,
    Io(std::io::Error),
}

/// Stream the body, aborting the instant cumulative bytes exceed the cap.
fn read_capped(mut response: reqwest::blocking::Response, max_bytes: u64) -> Result<Vec<u8>, CapError> {
    let mut out: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = response.read(&mut chunk).map_err(CapError::Io)?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() as u64 + n as u64 > max_bytes {
            return Err(CapError::Exceeded);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

/// True for any address the fetcher must never touch.
fn is_private_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // Carrier-grade NAT, 100.64.0.0/10
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // Unique-local fc00::/7
                || (seg[0] & 0xfe00) == 0xfc00
                // Link-local fe80::/10
                || (seg[0] & 0xffc0) == 0xfe80
                // IPv4-mapped addresses re-checked as IPv4
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_address(&IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> EvidenceFetcher {
        EvidenceFetcher::new(FetcherConfig::default())
    }

    #[test]
    fn test_loopback_blocked_without_any_request() {
        let f = fetcher();
        let r = f.fetch("http://127.0.0.1/terms", &BTreeMap::new(), &FetchLimits::default());
        assert!(matches!(r.outcome, FetchOutcome::BlockedUrl { .. }));
        assert_eq!(r.attempts, 0, "blocked URLs must not reach the network");
    }

    #[test]
    fn test_private_ranges_blocked() {
        let f = fetcher();
        for url in [
            "http://10.0.0.8/license",
            "http://192.168.1.1/",
            "http://172.16.0.1/tos",
            "http://169.254.169.254/latest/meta-data/",
            "http://[::1]/terms",
            "http://[fd00::1]/terms",
        ] {
            let r = f.fetch(url, &BTreeMap::new(), &FetchLimits::default());
            assert!(
                matches!(r.outcome, FetchOutcome::BlockedUrl { .. }),
                "{} should be blocked",
                url
            );
        }
    }

    #[test]
    fn test_non_http_scheme_blocked() {
        let f = fetcher();
        for url in ["ftp://example.com/LICENSE", "file:///etc/passwd", "gopher://x/"] {
            let r = f.fetch(url, &BTreeMap::new(), &FetchLimits::default());
            assert!(matches!(r.outcome, FetchOutcome::BlockedUrl { .. }), "{}", url);
        }
    }

    #[test]
    fn test_single_flight_keys_on_full_limit_set() {
        let f = fetcher();
        let url = "http://127.0.0.1/terms";
        let defaults = FetchLimits::default();
        let patient = FetchLimits {
            max_retries: 9,
            ..FetchLimits::default()
        };
        f.fetch(url, &BTreeMap::new(), &defaults);
        f.fetch(url, &BTreeMap::new(), &patient);
        assert_eq!(
            f.cache.lock().unwrap().len(),
            2,
            "different retry budgets must not share a cached result"
        );
        // Identical limits reuse the existing entry.
        f.fetch(url, &BTreeMap::new(), &defaults);
        assert_eq!(f.cache.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(
            FetchOutcome::BlockedUrl { reason: String::new() }.status_str(),
            "blocked_url"
        );
        assert_eq!(FetchOutcome::TooLarge { limit: 1 }.status_str(), "response_too_large");
    }

    #[test]
    fn test_public_ip_passes_guard() {
        let f = fetcher();
        assert!(f.validate_url("https://93.184.216.34/terms").is_ok());
    }

    #[test]
    fn test_allow_private_override() {
        let f = EvidenceFetcher::new(FetcherConfig {
            allow_private_networks: true,
            ..FetcherConfig::default()
        });
        assert!(f.validate_url("http://127.0.0.1:8080/fixture").is_ok());
    }
}
