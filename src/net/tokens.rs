//! Credential rotation and rate-limit bookkeeping.
//!
//! One pool is shared by every concurrent collection task. All quota state
//! lives behind a single mutex which is never held across an await point.

use crate::Result;
use crate::net::client::RateLimitInfo;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::bail;
use std::sync::Mutex;

const LOG_TARGET: &str = "    tokens";

/// Upper bound for a single wait on rate-limit reset.
const MAX_RATE_LIMIT_WAIT_SECS: u64 = 3600;

/// What to do when every credential in the pool is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Sleep until the earliest reset time, then rotate again.
    #[default]
    Wait,

    /// Fail fast so the caller can reschedule the whole task.
    Bail,
}

#[derive(Debug)]
struct Credential {
    token: String,
    remaining: u64,
    reset_at: DateTime<Utc>,
}

/// A rotating pool of API credentials with per-credential quota tracking.
#[derive(Debug)]
pub struct TokenPool {
    credentials: Mutex<Vec<Credential>>,
    policy: ExhaustionPolicy,
}

impl TokenPool {
    /// Create a pool. An empty token list means unauthenticated operation:
    /// every checkout yields `None` and quota tracking is upstream's problem.
    #[must_use]
    pub fn new(tokens: impl IntoIterator<Item = String>, policy: ExhaustionPolicy) -> Self {
        let now = Utc::now();
        let credentials = tokens
            .into_iter()
            .map(|token| Credential {
                token,
                // Assume quota until response headers teach us otherwise.
                remaining: 1,
                reset_at: now,
            })
            .collect();

        Self {
            credentials: Mutex::new(credentials),
            policy,
        }
    }

    /// Hand out a credential with remaining quota, or one whose reset time
    /// has passed. When all are exhausted, waits or bails per policy.
    pub async fn checkout(&self) -> Result<Option<String>> {
        loop {
            let earliest_reset = {
                let mut guard = self.credentials.lock().expect("lock not poisoned");

                if guard.is_empty() {
                    return Ok(None);
                }

                let now = Utc::now();
                if let Some(credential) = guard.iter_mut().find(|c| c.remaining > 0 || c.reset_at <= now) {
                    if credential.remaining == 0 {
                        // Reset elapsed; provisional quota until headers report the real value.
                        credential.remaining = 1;
                    }
                    return Ok(Some(credential.token.clone()));
                }

                guard.iter().map(|c| c.reset_at).min().expect("pool is non-empty")
            };

            match self.policy {
                ExhaustionPolicy::Bail => {
                    bail!("all API credentials are rate limited until {earliest_reset}");
                }
                ExhaustionPolicy::Wait => {
                    let now = Utc::now();
                    let wait = (earliest_reset - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(Duration::from_secs(MAX_RATE_LIMIT_WAIT_SECS));

                    log::warn!(
                        target: LOG_TARGET,
                        "All API credentials are rate limited, waiting {}s until the earliest reset",
                        wait.as_secs()
                    );

                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Feed quota information from response headers back into the pool.
    pub fn record(&self, token: &str, info: RateLimitInfo) {
        let mut guard = self.credentials.lock().expect("lock not poisoned");

        if let Some(credential) = guard.iter_mut().find(|c| c.token == token) {
            credential.remaining = info.remaining;
            credential.reset_at = info.reset_at;
        }
    }

    /// Force-mark a credential exhausted after a rate-limit response. Without
    /// a reset time from the headers, assume the usual one-hour window.
    pub fn exhaust(&self, token: &str, reset_at: Option<DateTime<Utc>>) {
        let reset_at = reset_at.unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));
        let mut guard = self.credentials.lock().expect("lock not poisoned");

        if let Some(credential) = guard.iter_mut().find(|c| c.token == token) {
            credential.remaining = 0;
            credential.reset_at = reset_at;
            log::debug!(target: LOG_TARGET, "Credential exhausted, resets at {reset_at}");
        }
    }
}
