//! Resilient HTTP client: every outbound API call goes through here.
//!
//! Wraps each request with credential checkout, transparent retry of
//! transient failures (network errors and 5xx) with doubling delay, and
//! rate-limit classification that feeds quota back into the [`TokenPool`].
//! Terminal statuses (2xx, 202, other 4xx) pass through untouched so callers
//! can apply their own domain policy.

use crate::Result;
use crate::net::TokenPool;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::EnrichableExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use std::sync::Arc;
use url::Url;

const LOG_TARGET: &str = "      http";

/// Cap on the doubling delay between retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Rate-limit state reported by API response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Bounded retry with doubling delay for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    tokens: Arc<TokenPool>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(tokens: Arc<TokenPool>, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent("pkg-harvest").build()?;

        Ok(Self { http, tokens, retry })
    }

    /// Issue a GET request, transparently retried and rate-limit-aware.
    ///
    /// Network errors and 5xx responses are retried up to the policy's
    /// attempt cap; exhaustion propagates as a retryable failure. Rate-limit
    /// responses rotate or wait on the credential pool without consuming the
    /// transient-retry budget. Everything else is returned to the caller.
    pub async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        let mut delay = self.retry.base_delay;

        loop {
            let token = self.tokens.checkout().await?;
            let mut request = self.http.get(url.clone());

            if let Some(t) = &token {
                let mut auth_val = HeaderValue::from_str(&format!("token {t}"))?;
                auth_val.set_sensitive(true);
                request = request.header(AUTHORIZATION, auth_val);
            }

            let failure = match request.send().await {
                Ok(resp) => {
                    let rate_limit = rate_limit_from_headers(resp.headers());
                    if let (Some(t), Some(info)) = (&token, rate_limit) {
                        self.tokens.record(t, info);
                    }

                    let status = resp.status();
                    let rate_limited =
                        matches!(status.as_u16(), 403 | 429) && rate_limit.is_some_and(|info| info.remaining == 0);

                    if rate_limited && let Some(t) = &token {
                        log::debug!(target: LOG_TARGET, "Rate limited on '{url}', rotating credentials");
                        self.tokens.exhaust(t, rate_limit.map(|info| info.reset_at));
                        continue;
                    }

                    if !status.is_server_error() && !rate_limited {
                        return Ok(resp);
                    }

                    ohno::app_err!("request to '{url}' failed with HTTP {status}")
                }
                Err(e) => ohno::AppError::from(e),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(failure.enrich_with(|| format!("request to '{url}' failed after {attempt} attempts")));
            }

            log::debug!(
                target: LOG_TARGET,
                "Transient failure on '{url}' (attempt {attempt}/{}), retrying in {}ms: {failure:#}",
                self.retry.max_attempts,
                delay.as_millis()
            );

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }
}

/// Extract rate-limit information from API response headers.
fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse::<u64>().ok()?;
    let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;

    Some(RateLimitInfo { remaining, reset_at })
}
