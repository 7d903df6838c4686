//! Registry archive download, extraction, and manifest merge.

mod extract;
mod merge;
mod npm;

pub use npm::{DownloadOptions, Downloader};

use core::fmt::{Display, Formatter};

/// Failure class of a download, so callers can tell "try again later" from
/// "do not retry".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    /// Network-level failure after retries; the caller may reschedule.
    Transient,

    /// The archive exceeds the size ceiling. Never retry.
    TooLarge,

    /// The archive bytes are not a valid gzip'd tarball. Never retry.
    CorruptArchive,

    /// The manifest's tarball URL cannot be parsed. Never retry.
    InvalidTarballUrl,
}

/// A download failure tagged with its class.
#[derive(Debug)]
pub struct DownloadError {
    kind: DownloadErrorKind,
    inner: ohno::AppError,
}

impl DownloadError {
    pub(crate) const fn transient(inner: ohno::AppError) -> Self {
        Self {
            kind: DownloadErrorKind::Transient,
            inner,
        }
    }

    pub(crate) fn too_large(received: u64, limit: u64) -> Self {
        Self {
            kind: DownloadErrorKind::TooLarge,
            inner: ohno::app_err!("archive is too large: {received} bytes exceeds the {limit} byte ceiling"),
        }
    }

    pub(crate) const fn corrupt(inner: ohno::AppError) -> Self {
        Self {
            kind: DownloadErrorKind::CorruptArchive,
            inner,
        }
    }

    pub(crate) const fn invalid_url(inner: ohno::AppError) -> Self {
        Self {
            kind: DownloadErrorKind::InvalidTarballUrl,
            inner,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> DownloadErrorKind {
        self.kind
    }

    /// Whether the caller must not retry this download.
    #[must_use]
    pub const fn is_unrecoverable(&self) -> bool {
        !matches!(self.kind, DownloadErrorKind::Transient)
    }

    #[must_use]
    pub fn into_inner(self) -> ohno::AppError {
        self.inner
    }
}

impl Display for DownloadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl core::error::Error for DownloadError {}

impl From<ohno::AppError> for DownloadError {
    fn from(inner: ohno::AppError) -> Self {
        Self::transient(inner)
    }
}
