//! Tagged collection outcome.
//!
//! "This package legitimately has no data" and "the request failed" are
//! different things: the first is [`Collected::Skipped`], the second rides
//! the `Result` layer so call sites stay exhaustive.

use core::fmt::{Display, Formatter};

/// Why a collection was deliberately skipped. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The manifest declares no repository at all.
    NoRepository,

    /// The repository URL is unparseable or not on a supported host.
    UnsupportedHost,

    /// The repository exists upstream but has no content.
    EmptyRepository,

    /// Upstream refused the metadata request with this status code
    /// (404 not found, 400 malformed name, 403/451 blocked or taken down).
    Unavailable(u16),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoRepository => write!(f, "no repository is declared"),
            Self::UnsupportedHost => write!(f, "repository is not hosted on a supported platform"),
            Self::EmptyRepository => write!(f, "repository is empty"),
            Self::Unavailable(code) => write!(f, "repository metadata request failed with {code}"),
        }
    }
}

/// Result of a collection: data, or a well-defined "nothing to collect".
#[derive(Debug, Clone, PartialEq)]
pub enum Collected<T> {
    /// Collection succeeded and produced data.
    Found(T),

    /// Collection was deliberately skipped; downstream treats the package as
    /// having no data from this source.
    Skipped(SkipReason),
}

impl<T> Collected<T> {
    /// Returns `true` if the result carries data.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Converts into an `Option`, discarding the skip reason.
    #[must_use]
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Found(data) => Some(data),
            Self::Skipped(_) => None,
        }
    }

    /// The skip reason, if this result is a skip.
    #[must_use]
    pub const fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Found(_) => None,
            Self::Skipped(reason) => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reasons_describe_themselves() {
        assert_eq!(SkipReason::EmptyRepository.to_string(), "repository is empty");
        assert_eq!(
            SkipReason::Unavailable(404).to_string(),
            "repository metadata request failed with 404"
        );
    }

    #[test]
    fn helpers_distinguish_found_from_skipped() {
        let found: Collected<u32> = Collected::Found(7);
        assert!(found.is_found());
        assert_eq!(found.ok(), Some(7));

        let skipped: Collected<u32> = Collected::Skipped(SkipReason::NoRepository);
        assert!(!skipped.is_found());
        assert_eq!(skipped.skip_reason(), Some(SkipReason::NoRepository));
        assert_eq!(skipped.ok(), None);
    }
}
