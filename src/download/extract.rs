//! Tarball extraction.
//!
//! Registry archives are gzip'd tarballs that conventionally wrap their
//! contents in a single top-level directory (`package/`). When every entry
//! shares one leading path component it is stripped; entries that would
//! escape the destination are skipped outright.

use crate::download::DownloadError;
use flate2::read::GzDecoder;
use ohno::IntoAppError;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tar::Archive;

const LOG_TARGET: &str = "   extract";

/// Extract a gzip'd tarball into `dest`. Blocking; run under `spawn_blocking`.
pub(crate) fn extract_tarball(body: &[u8], dest: &Path) -> Result<(), DownloadError> {
    let shared_root = shared_leading_component(body)?;

    let mut archive = Archive::new(GzDecoder::new(body));
    let entries = archive
        .entries()
        .map_err(|e| DownloadError::corrupt(ohno::app_err!("corrupt archive: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| DownloadError::corrupt(ohno::app_err!("corrupt archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| DownloadError::corrupt(ohno::app_err!("corrupt archive entry path: {e}")))?
            .into_owned();

        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            log::debug!(target: LOG_TARGET, "Skipping special archive entry '{}'", path.display());
            continue;
        }

        let Some(relative) = sanitized_path(&path, shared_root.as_deref()) else {
            continue;
        };

        let out = dest.join(relative);
        if kind.is_dir() {
            fs::create_dir_all(&out).into_app_err_with(|| format!("could not create directory '{}'", out.display()))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).into_app_err_with(|| format!("could not create directory '{}'", parent.display()))?;
        }

        let _ = entry
            .unpack(&out)
            .map_err(|e| DownloadError::corrupt(ohno::app_err!("could not unpack '{}': {e}", path.display())))?;
    }

    Ok(())
}

/// The single path component every archive entry starts with, if any.
///
/// Returns `None` when entries disagree on their first component or when a
/// file sits directly at the archive root, in which case nothing is stripped.
fn shared_leading_component(body: &[u8]) -> Result<Option<PathBuf>, DownloadError> {
    let mut archive = Archive::new(GzDecoder::new(body));
    let entries = archive
        .entries()
        .map_err(|e| DownloadError::corrupt(ohno::app_err!("corrupt archive: {e}")))?;

    let mut shared: Option<PathBuf> = None;

    for entry in entries {
        let entry = entry.map_err(|e| DownloadError::corrupt(ohno::app_err!("corrupt archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| DownloadError::corrupt(ohno::app_err!("corrupt archive entry path: {e}")))?
            .into_owned();

        let mut components = path.components().filter_map(|c| match c {
            Component::Normal(part) => Some(PathBuf::from(part)),
            _ => None,
        });

        let Some(first) = components.next() else {
            continue;
        };

        if components.next().is_none() && entry.header().entry_type().is_file() {
            // A file at the archive root: there is no wrapper directory.
            return Ok(None);
        }

        match &shared {
            None => shared = Some(first),
            Some(existing) if *existing == first => {}
            Some(_) => return Ok(None),
        }
    }

    Ok(shared)
}

/// Normalize an entry path: keep only normal components, drop the shared
/// root, refuse anything that would step outside the destination.
fn sanitized_path(path: &Path, shared_root: Option<&Path>) -> Option<PathBuf> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                log::debug!(target: LOG_TARGET, "Skipping unsafe archive entry '{}'", path.display());
                return None;
            }
        }
    }

    let mut relative: PathBuf = parts.iter().collect();

    if let Some(root) = shared_root
        && let Ok(stripped) = relative.strip_prefix(root)
    {
        relative = stripped.to_path_buf();
    }

    if relative.as_os_str().is_empty() { None } else { Some(relative) }
}
