//! Metadata collection from the source-hosting platform.

mod github;
mod result;

pub use github::{CollectOptions, GithubCollector, GithubOptions, RepoData, StatusEntry, StatusState, WeekActivity};
pub use result::{Collected, SkipReason};
