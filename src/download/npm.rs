//! Registry archive downloader.
//!
//! Streams the package tarball into a caller-owned working directory,
//! enforcing a byte-size ceiling, and reconciles the archive's embedded
//! manifest with the registry's. A missing or 404 tarball is a normal
//! outcome: the directory then holds only the serialized registry manifest.

use crate::Result;
use crate::download::{DownloadError, extract, merge};
use crate::manifest::PackageManifest;
use crate::net::RetryPolicy;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use futures_util::StreamExt;
use ohno::IntoAppError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

const LOG_TARGET: &str = "  download";

/// Canonical manifest file written into the working directory.
const MANIFEST_FILE: &str = "package.json";

/// Extraction happens here before being promoted into the target, so the
/// target never holds partial files.
const STAGING_DIR: &str = ".harvest-staging";

/// Cap on the doubling delay between download retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Downloader configuration.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Byte-size ceiling for the archive, checked against the declared
    /// content length and the bytes actually received.
    pub max_size: u64,

    /// Registry fields that survive a broken embedded manifest.
    pub fallback_fields: Vec<String>,

    pub retry: RetryPolicy,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_size: 262_144_000,
            fallback_fields: vec!["name".to_owned(), "dist".to_owned()],
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Downloader {
    http: reqwest::Client,
    opts: DownloadOptions,
}

impl Downloader {
    pub fn new(opts: DownloadOptions) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent("pkg-harvest").build()?;

        Ok(Self { http, opts })
    }

    /// Download and extract the package archive into `target`, a directory
    /// owned (created and eventually cleaned up) by the caller.
    ///
    /// Returns the merged manifest, which is also written to the target as
    /// `package.json`. The caller decides whether to apply the merged fields
    /// to its own record; the input manifest is never mutated.
    pub async fn download(&self, manifest: &PackageManifest, target: &Path) -> Result<PackageManifest, DownloadError> {
        let Some(tarball) = manifest.tarball() else {
            log::debug!(target: LOG_TARGET, "Package '{}' declares no tarball, storing the manifest only", manifest.name);
            return write_manifest_only(manifest, target);
        };

        let url = Url::parse(tarball)
            .into_app_err_with(|| format!("invalid tarball URL '{tarball}'"))
            .map_err(DownloadError::invalid_url)?;

        let Some(body) = self.fetch_archive(&url).await? else {
            log::info!(target: LOG_TARGET, "Tarball for '{}' not found (404), storing the manifest only", manifest.name);
            return write_manifest_only(manifest, target);
        };

        log::debug!(target: LOG_TARGET, "Fetched {} bytes for '{}', extracting", body.len(), manifest.name);

        let registry = manifest.clone();
        let target_dir = target.to_path_buf();
        let fallback_fields = self.opts.fallback_fields.clone();

        // Dropping this future cannot stop the blocking task, but the guard
        // flips the flag on drop and the task then declines to promote into
        // the target.
        let cancelled = Arc::new(AtomicBool::new(false));
        let guard = CancelGuard(Arc::clone(&cancelled));

        let merged =
            tokio::task::spawn_blocking(move || unpack_and_merge(&body, &target_dir, &registry, &fallback_fields, &cancelled))
                .await
                .map_err(|e| DownloadError::transient(ohno::app_err!("extraction task failed: {e}")))?;

        drop(guard);
        merged
    }

    /// Fetch the archive bytes, retrying transient failures with doubling
    /// delay. `None` means the registry has no archive (404).
    async fn fetch_archive(&self, url: &Url) -> Result<Option<Vec<u8>>, DownloadError> {
        let mut attempt = 0u32;
        let mut delay = self.opts.retry.base_delay;

        loop {
            let failure = match self.fetch_archive_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_unrecoverable() => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.opts.retry.max_attempts {
                return Err(failure);
            }

            log::debug!(
                target: LOG_TARGET,
                "Transient failure fetching '{url}' (attempt {attempt}/{}), retrying in {}ms: {failure}",
                self.opts.retry.max_attempts,
                delay.as_millis()
            );

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }

    async fn fetch_archive_once(&self, url: &Url) -> Result<Option<Vec<u8>>, DownloadError> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::transient(e.into()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            return Err(DownloadError::transient(ohno::app_err!(
                "tarball request to '{url}' failed with HTTP {status}"
            )));
        }

        if let Some(declared) = resp.content_length()
            && declared > self.opts.max_size
        {
            return Err(DownloadError::too_large(declared, self.opts.max_size));
        }

        // Servers lie about content length; count what actually arrives and
        // abort the stream the moment the ceiling is crossed.
        let mut stream = resp.bytes_stream();
        let mut body = Vec::new();
        let mut received = 0u64;

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| DownloadError::transient(e.into()))?;
            received += bytes.len() as u64;

            if received > self.opts.max_size {
                return Err(DownloadError::too_large(received, self.opts.max_size));
            }

            body.extend_from_slice(&bytes);
        }

        Ok(Some(body))
    }
}

/// Flips its flag when dropped. The downloader holds it across the blocking
/// extraction, so an early drop means the caller abandoned the download.
struct CancelGuard(Arc<AtomicBool>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Extract into a staging directory, merge the manifests there, then promote
/// everything into the target. On any failure the staging directory is
/// removed and the target is left untouched.
fn unpack_and_merge(
    body: &[u8],
    target: &Path,
    registry: &PackageManifest,
    fallback_fields: &[String],
    cancelled: &AtomicBool,
) -> Result<PackageManifest, DownloadError> {
    let staging = target.join(STAGING_DIR);

    let result = (|| {
        if staging.exists() {
            fs::remove_dir_all(&staging).into_app_err("could not clear the staging directory")?;
        }
        fs::create_dir_all(&staging).into_app_err("could not create the staging directory")?;

        extract::extract_tarball(body, &staging)?;

        let embedded = fs::read(staging.join(MANIFEST_FILE)).ok();
        let merged = merge::merge_manifest(registry, embedded.as_deref(), fallback_fields);

        write_manifest(&merged, &staging)?;

        if cancelled.load(Ordering::Relaxed) {
            return Err(DownloadError::transient(ohno::app_err!(
                "download was abandoned before the extracted files were promoted"
            )));
        }

        promote(&staging, target)?;

        Ok(merged)
    })();

    let _ = fs::remove_dir_all(&staging);
    result
}

/// Move every staged entry into the target directory. A failure part-way
/// removes the entries moved so far, so the target never holds a torn
/// promotion.
fn promote(staging: &Path, target: &Path) -> Result<(), DownloadError> {
    let entries = fs::read_dir(staging).into_app_err("could not list the staging directory")?;
    let mut promoted: Vec<PathBuf> = Vec::new();

    let result = (|| {
        for entry in entries {
            let entry = entry.into_app_err("could not list the staging directory")?;
            let dest = target.join(entry.file_name());

            if dest.is_dir() {
                fs::remove_dir_all(&dest).into_app_err_with(|| format!("could not replace '{}'", dest.display()))?;
            } else if dest.exists() {
                fs::remove_file(&dest).into_app_err_with(|| format!("could not replace '{}'", dest.display()))?;
            }

            fs::rename(entry.path(), &dest).into_app_err_with(|| format!("could not move '{}' into place", dest.display()))?;
            promoted.push(dest);
        }

        Ok(())
    })();

    if result.is_err() {
        for dest in promoted {
            let _ = if dest.is_dir() {
                fs::remove_dir_all(&dest)
            } else {
                fs::remove_file(&dest)
            };
        }
    }

    result
}

/// Synthesize a target directory holding only the serialized manifest.
fn write_manifest_only(manifest: &PackageManifest, target: &Path) -> Result<PackageManifest, DownloadError> {
    write_manifest(manifest, target)?;
    Ok(manifest.clone())
}

fn write_manifest(manifest: &PackageManifest, dir: &Path) -> Result<(), DownloadError> {
    let json = serde_json::to_vec_pretty(manifest).into_app_err("could not serialize the manifest")?;
    let path = dir.join(MANIFEST_FILE);
    fs::write(&path, json).into_app_err_with(|| format!("could not write '{}'", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn abandoned_downloads_do_not_promote_into_the_target() {
        let body = tarball(&[("package/package.json", br#"{ "name": "x" }"#)]);
        let dir = tempfile::tempdir().unwrap();
        let registry = PackageManifest::new("x");
        let cancelled = AtomicBool::new(true);

        let err = unpack_and_merge(&body, dir.path(), &registry, &["name".to_owned()], &cancelled).unwrap_err();
        assert!(!err.is_unrecoverable());
        assert!(entry_names(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failed_promotion_rolls_back_entries_already_moved() {
        use std::os::unix::fs::PermissionsExt;

        let staging = tempfile::tempdir().unwrap();
        fs::write(staging.path().join("index.js"), b"1").unwrap();
        fs::create_dir(staging.path().join("lib")).unwrap();
        fs::write(staging.path().join("lib").join("a.js"), b"2").unwrap();

        // A read-only pre-existing destination directory cannot be replaced.
        let target = tempfile::tempdir().unwrap();
        let blocked = target.path().join("lib");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep.js"), b"3").unwrap();
        fs::set_permissions(&blocked, fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged processes ignore directory permissions; the failure
        // cannot be provoked then.
        if fs::write(blocked.join("writable-check"), b"").is_ok() {
            fs::set_permissions(&blocked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = promote(staging.path(), target.path());
        fs::set_permissions(&blocked, fs::Permissions::from_mode(0o755)).unwrap();

        let _ = result.unwrap_err();
        assert_eq!(entry_names(target.path()), vec!["lib"]);
        assert_eq!(entry_names(&blocked), vec!["keep.js"]);
    }
}
