//! Resolution of a manifest `repository.url` into a host/owner/name triple.

use crate::Result;
use core::fmt::{Display, Formatter};
use ohno::bail;
use url::Url;

/// Hosts the collector knows how to talk to.
const SUPPORTED_HOST: &str = "github.com";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSpec {
    host: Box<str>,
    owner: Box<str>,
    name: Box<str>,
}

impl RepoSpec {
    /// Parse a repository URL as found in package manifests.
    ///
    /// Accepts `https://`, `git://`, `git+https://`/`git+ssh://`, and
    /// scp-style `git@host:owner/name.git` forms.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize_git_url(raw);
        let url = Url::parse(&normalized)?;

        let Some(host) = url.host_str() else {
            bail!("repository URL has no host: {raw}");
        };

        let path_segments: Vec<_> = url.path_segments().map(Iterator::collect).unwrap_or_default();

        if path_segments.len() < 2 || path_segments[0].is_empty() || path_segments[1].is_empty() {
            bail!("repository URL has no owner/name path: {raw}");
        }

        Ok(Self {
            host: Box::from(host),
            owner: Box::from(path_segments[0]),
            name: Box::from(path_segments[1].trim_end_matches(".git")),
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this repository lives on a host the collector supports.
    #[must_use]
    pub fn is_collectable(&self) -> bool {
        self.host.as_ref() == SUPPORTED_HOST
    }
}

impl Display for RepoSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Rewrite the git URL spellings that `Url::parse` cannot digest.
fn normalize_git_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("git+").unwrap_or(trimmed);

    // scp-style: git@github.com:owner/name.git
    if !trimmed.contains("://")
        && let Some((user_host, path)) = trimmed.split_once(':')
        && user_host.contains('@')
    {
        return format!("ssh://{user_host}/{path}");
    }

    trimmed.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_url_forms() {
        for raw in [
            "https://github.com/IndigoUnited/node-cross-spawn.git",
            "git://github.com/IndigoUnited/node-cross-spawn.git",
            "git+https://github.com/IndigoUnited/node-cross-spawn.git",
            "git+ssh://git@github.com/IndigoUnited/node-cross-spawn.git",
            "git@github.com:IndigoUnited/node-cross-spawn.git",
        ] {
            let spec = RepoSpec::parse(raw).unwrap();
            assert_eq!(spec.host(), "github.com", "{raw}");
            assert_eq!(spec.owner(), "IndigoUnited", "{raw}");
            assert_eq!(spec.name(), "node-cross-spawn", "{raw}");
            assert!(spec.is_collectable(), "{raw}");
        }
    }

    #[test]
    fn other_hosts_parse_but_are_not_collectable() {
        let spec = RepoSpec::parse("https://foo.com/IndigoUnited/node-cross-spawn.git").unwrap();
        assert!(!spec.is_collectable());
        assert_eq!(spec.to_string(), "IndigoUnited/node-cross-spawn");
    }

    #[test]
    fn rejects_urls_without_a_repo_path() {
        let _ = RepoSpec::parse("https://github.com/").unwrap_err();
        let _ = RepoSpec::parse("https://github.com/only-owner").unwrap_err();
        let _ = RepoSpec::parse("not a url at all").unwrap_err();
    }
}
