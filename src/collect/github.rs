//! GitHub repository metadata collector.
//!
//! For a package manifest, resolves the repository, fetches its metadata,
//! fork lineage, commit-activity statistics, and CI statuses for the
//! relevant ref, and produces a normalized [`RepoData`]. Expected upstream
//! conditions (missing repo, takedowns, empty repos) are skips, never errors.

use crate::Result;
use crate::collect::{Collected, SkipReason};
use crate::manifest::PackageManifest;
use crate::net::ApiClient;
use crate::repo_spec::RepoSpec;
use core::time::Duration;
use ohno::{IntoAppError, bail};
use serde::{Deserialize, Serialize};
use url::Url;

const LOG_TARGET: &str = "    github";

/// Branch assumed when neither the manifest nor upstream names one.
const DEFAULT_BRANCH_FALLBACK: &str = "master";

/// Status codes upstream uses for "this repository is not available to you":
/// not found, malformed name, access blocked, legal takedown.
const UNAVAILABLE_CODES: [u16; 4] = [404, 400, 403, 451];

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct GithubOptions {
    /// Base URL of the platform API.
    pub api_base: Url,

    /// Attempt cap for the commit-activity materialization poll.
    pub activity_attempts: u32,

    /// Fixed delay between commit-activity polls. Distinct from the generic
    /// transient-retry policy on purpose: upstream asks us to come back
    /// later, it is not failing.
    pub activity_delay: Duration,
}

impl Default for GithubOptions {
    fn default() -> Self {
        Self {
            api_base: Url::parse("https://api.github.com").expect("valid default API base"),
            activity_attempts: 5,
            activity_delay: Duration::from_secs(15),
        }
    }
}

/// Per-collection options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    /// Ref to resolve commit statuses against, overriding the manifest.
    pub ref_override: Option<String>,
}

/// Normalized repository metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    pub stars: u64,
    pub forks: u64,
    pub subscribers: u64,

    /// `owner/name` of the upstream parent when the repository is a fork.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_of: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,

    /// Weekly commit activity for the past year. Omitted when upstream never
    /// finished materializing the statistic within the poll budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commits_activity: Option<Vec<WeekActivity>>,

    /// Commit/CI statuses for the resolved ref, in upstream order.
    pub statuses: Vec<StatusEntry>,
}

/// One week of commit activity as reported by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekActivity {
    pub week: i64,
    pub total: u64,
    pub days: [u64; 7],
}

/// A single commit status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub context: String,
    pub state: StatusState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Success,
    Failure,
    Pending,
    Error,
}

/// Repository metadata payload, reduced to the fields we act on.
#[derive(Debug, Deserialize)]
struct RepoPayload {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    parent: Option<ParentPayload>,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    stargazers_count: Option<u64>,
    #[serde(default)]
    forks_count: Option<u64>,
    #[serde(default)]
    subscribers_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ParentPayload {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct CombinedStatusPayload {
    #[serde(default)]
    statuses: Vec<StatusEntry>,
}

/// One turn of the commit-activity materialization poll.
#[derive(Debug)]
enum Materialization {
    Ready(Vec<WeekActivity>),
    Pending,
}

#[derive(Debug, Clone)]
pub struct GithubCollector {
    client: ApiClient,
    opts: GithubOptions,
}

impl GithubCollector {
    #[must_use]
    pub const fn new(client: ApiClient, opts: GithubOptions) -> Self {
        Self { client, opts }
    }

    /// Collect repository metadata for a package manifest.
    ///
    /// Never fails for expected upstream conditions; those produce
    /// [`Collected::Skipped`]. Transport failures that survive the client's
    /// retry policy propagate as errors and the caller may reschedule.
    pub async fn collect(&self, manifest: &PackageManifest, options: &CollectOptions) -> Result<Collected<RepoData>> {
        let Some(repository) = &manifest.repository else {
            log::info!(target: LOG_TARGET, "Package '{}': {}", manifest.name, SkipReason::NoRepository);
            return Ok(Collected::Skipped(SkipReason::NoRepository));
        };

        let spec = match RepoSpec::parse(&repository.url) {
            Ok(spec) if spec.is_collectable() => spec,
            Ok(spec) => {
                log::info!(
                    target: LOG_TARGET,
                    "Package '{}': {} ('{}')",
                    manifest.name,
                    SkipReason::UnsupportedHost,
                    spec.host()
                );
                return Ok(Collected::Skipped(SkipReason::UnsupportedHost));
            }
            Err(e) => {
                log::info!(target: LOG_TARGET, "Package '{}': {}: {e:#}", manifest.name, SkipReason::UnsupportedHost);
                return Ok(Collected::Skipped(SkipReason::UnsupportedHost));
            }
        };

        let payload = match self.fetch_repo(&spec).await? {
            Collected::Found(payload) => payload,
            Collected::Skipped(reason) => return Ok(Collected::Skipped(reason)),
        };

        if payload.size == Some(0) {
            log::info!(target: LOG_TARGET, "Repository '{spec}' is empty");
            return Ok(Collected::Skipped(SkipReason::EmptyRepository));
        }

        let fork_of = if payload.fork {
            payload.parent.map(|parent| parent.full_name)
        } else {
            None
        };

        let commits_activity = self.poll_commit_activity(&spec).await?;

        let ref_name = options
            .ref_override
            .clone()
            .or_else(|| manifest.git_head.clone())
            .or_else(|| payload.default_branch.clone())
            .unwrap_or_else(|| DEFAULT_BRANCH_FALLBACK.to_owned());

        let statuses = self.fetch_statuses(&spec, &ref_name).await?;

        Ok(Collected::Found(RepoData {
            homepage: payload.homepage.filter(|h| !h.is_empty()),
            stars: payload.stargazers_count.unwrap_or(0),
            forks: payload.forks_count.unwrap_or(0),
            subscribers: payload.subscribers_count.unwrap_or(0),
            fork_of,
            default_branch: payload.default_branch,
            commits_activity,
            statuses,
        }))
    }

    /// Fetch repository metadata, mapping the unavailable-status taxonomy to skips.
    async fn fetch_repo(&self, spec: &RepoSpec) -> Result<Collected<RepoPayload>> {
        let url = self.api_url(&format!("repos/{}/{}", spec.owner(), spec.name()))?;
        let resp = self.client.get(url).await?;
        let status = resp.status();
        let code = status.as_u16();

        if UNAVAILABLE_CODES.contains(&code) {
            log::info!(target: LOG_TARGET, "Repository '{spec}' metadata request failed with {code}");
            return Ok(Collected::Skipped(SkipReason::Unavailable(code)));
        }

        if !status.is_success() {
            bail!("repository metadata request for '{spec}' failed with HTTP {status}");
        }

        let payload = resp
            .json()
            .await
            .into_app_err_with(|| format!("malformed repository metadata for '{spec}'"))?;

        Ok(Collected::Found(payload))
    }

    /// Bounded poll for the lazily-materialized commit-activity statistic.
    ///
    /// 202 means upstream is still computing; retry after a fixed delay up to
    /// the attempt cap. Cap exhaustion omits the statistic rather than
    /// failing the collection.
    async fn poll_commit_activity(&self, spec: &RepoSpec) -> Result<Option<Vec<WeekActivity>>> {
        let url = self.api_url(&format!("repos/{}/{}/stats/commit_activity", spec.owner(), spec.name()))?;

        for attempt in 1..=self.opts.activity_attempts {
            match self.fetch_activity_once(url.clone(), spec).await? {
                Materialization::Ready(weeks) => return Ok(Some(weeks)),
                Materialization::Pending => {
                    log::debug!(
                        target: LOG_TARGET,
                        "Commit activity for '{spec}' is still materializing (attempt {attempt}/{})",
                        self.opts.activity_attempts
                    );

                    if attempt < self.opts.activity_attempts {
                        tokio::time::sleep(self.opts.activity_delay).await;
                    }
                }
            }
        }

        log::warn!(
            target: LOG_TARGET,
            "Commit activity for '{spec}' never materialized within {} attempts, omitting it",
            self.opts.activity_attempts
        );

        Ok(None)
    }

    async fn fetch_activity_once(&self, url: Url, spec: &RepoSpec) -> Result<Materialization> {
        let resp = self.client.get(url).await?;
        let status = resp.status();

        if status.as_u16() == 202 {
            return Ok(Materialization::Pending);
        }

        if !status.is_success() {
            bail!("commit activity request for '{spec}' failed with HTTP {status}");
        }

        let weeks = resp
            .json()
            .await
            .into_app_err_with(|| format!("malformed commit activity for '{spec}'"))?;

        Ok(Materialization::Ready(weeks))
    }

    /// Fetch the combined commit status for a ref, preserving upstream order.
    async fn fetch_statuses(&self, spec: &RepoSpec, ref_name: &str) -> Result<Vec<StatusEntry>> {
        let url = self.api_url(&format!("repos/{}/{}/commits/{ref_name}/status", spec.owner(), spec.name()))?;
        let resp = self.client.get(url).await?;
        let status = resp.status();

        if status.as_u16() == 404 {
            // Unknown ref upstream; a ref with no statuses is still a valid answer.
            log::info!(target: LOG_TARGET, "Repository '{spec}' has no commit statuses for ref '{ref_name}'");
            return Ok(Vec::new());
        }

        if !status.is_success() {
            bail!("commit status request for '{spec}@{ref_name}' failed with HTTP {status}");
        }

        let payload: CombinedStatusPayload = resp
            .json()
            .await
            .into_app_err_with(|| format!("malformed commit status for '{spec}@{ref_name}'"))?;

        Ok(payload.statuses)
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        self.opts
            .api_base
            .join(path)
            .into_app_err_with(|| format!("could not build API URL for '{path}'"))
    }
}
