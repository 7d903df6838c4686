//! pkg-harvest crate
//!
//! Metadata-collection stage of a package-analysis pipeline: gathers repository
//! metadata from GitHub and the distributable archive from the npm registry,
//! producing a normalized record per package for downstream scoring.

/// Result type alias using `ohno::AppError` as the default error type.
pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod collect;

pub mod download;

pub mod manifest;

pub mod net;

pub mod repo_spec;
