//! Polite HTTP fetcher shared by every source.
//!
//! One [`HttpFetcher`] per pass: it rate-limits successive requests, retries
//! failures with exponential backoff, and refuses SSRF-prone targets.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use euchub_shared::{CrawlPoliciesConfig, EucHubError, Result};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("EucHub/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Rate-limited, retrying HTTP client.
pub struct HttpFetcher {
    client: Client,
    policies: CrawlPoliciesConfig,
    last_request: Mutex<Option<Instant>>,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl HttpFetcher {
    /// Create a fetcher with the given crawl policies.
    pub fn new(policies: CrawlPoliciesConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(policies.request_timeout_secs))
            .build()
            .map_err(|e| EucHubError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policies,
            last_request: Mutex::new(None),
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// GET `url` and return the body text, retrying transient failures.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_text(&self, url: &Url) -> Result<String> {
        if !self.allow_localhost && is_ssrf_target(url) {
            return Err(EucHubError::validation(format!(
                "refusing to fetch private or non-http URL {url}"
            )));
        }

        let attempts = self.policies.retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            self.wait_for_slot().await;

            match self.try_fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(attempt = attempt + 1, attempts, error = %e, "request failed");
                    last_error = Some(e);
                }
            }

            if attempt + 1 < attempts {
                let backoff =
                    Duration::from_millis(self.policies.retry_base_ms.saturating_mul(2u64.saturating_pow(attempt)));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| EucHubError::Network(format!("{url}: no attempts made"))))
    }

    /// Sleep until `rate_limit_ms` has passed since the previous request.
    async fn wait_for_slot(&self) {
        let min_gap = Duration::from_millis(self.policies.rate_limit_ms);
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_gap {
                tokio::time::sleep(min_gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn try_fetch(&self, url: &Url) -> Result<String> {
        debug!("fetching");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| EucHubError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EucHubError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(EucHubError::validation(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        response
            .text()
            .await
            .map_err(|e| EucHubError::Network(format!("{url}: body read failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
