//! Integration tests for the registry archive downloader using wiremock.

use core::time::Duration;
use flate2::Compression;
use flate2::write::GzEncoder;
use pkg_harvest::download::{DownloadErrorKind, DownloadOptions, Downloader};
use pkg_harvest::manifest::{Dist, PackageManifest};
use pkg_harvest::net::RetryPolicy;
use serde_json::{Map, Value, json};
use std::fs;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TARBALL_PATH: &str = "/cross-spawn/-/cross-spawn-0.1.0.tgz";

fn downloader() -> Downloader {
    Downloader::new(DownloadOptions {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
        },
        ..DownloadOptions::default()
    })
    .expect("downloader builds")
}

fn manifest_with_tarball(server: &MockServer) -> PackageManifest {
    let mut manifest = PackageManifest::new("cool-module");
    manifest.dist = Some(Dist {
        tarball: Some(format!("{}{TARBALL_PATH}", server.uri())),
        rest: Map::new(),
    });
    manifest
}

fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (entry_path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry_path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

async fn mount_tarball(server: &MockServer, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(TARBALL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/octet-stream"))
        .mount(server)
        .await;
}

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn downloads_extracts_and_merges_the_tarball() {
    let server = MockServer::start().await;
    mount_tarball(
        &server,
        tarball(&[
            (
                "package/package.json",
                br#"{ "name": "cross-spawn", "version": "0.1.0", "description": "Cross platform spawn" }"#,
            ),
            ("package/index.js", b"module.exports = 1;"),
        ]),
    )
    .await;

    let target = tempfile::tempdir().unwrap();
    let registry = manifest_with_tarball(&server);

    let merged = downloader().download(&registry, target.path()).await.unwrap();

    // Archive fields win, the registry's dist survives.
    assert_eq!(merged.name, "cross-spawn");
    assert_eq!(merged.rest.get("version"), Some(&json!("0.1.0")));
    assert_eq!(merged.rest.get("description"), Some(&json!("Cross platform spawn")));
    assert_eq!(merged.tarball(), registry.tarball());

    // The input manifest is untouched.
    assert_eq!(registry.name, "cool-module");

    // Extracted files land with the wrapper directory stripped, and the
    // canonical manifest on disk is the merged one.
    assert!(target.path().join("index.js").is_file());
    let on_disk: Value = serde_json::from_slice(&fs::read(target.path().join("package.json")).unwrap()).unwrap();
    assert_eq!(on_disk.get("name"), Some(&json!("cross-spawn")));
    assert_eq!(on_disk.get("version"), Some(&json!("0.1.0")));
    assert_eq!(dir_entries(target.path()), vec!["index.js", "package.json"]);
}

#[tokio::test]
async fn no_tarball_writes_the_manifest_only() {
    let target = tempfile::tempdir().unwrap();
    let registry = PackageManifest::new("cool-module");

    let merged = downloader().download(&registry, target.path()).await.unwrap();
    assert_eq!(merged, registry);
    assert_eq!(dir_entries(target.path()), vec!["package.json"]);

    let on_disk: PackageManifest = serde_json::from_slice(&fs::read(target.path().join("package.json")).unwrap()).unwrap();
    assert_eq!(on_disk, registry);
}

#[tokio::test]
async fn tarball_404_writes_the_manifest_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TARBALL_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let target = tempfile::tempdir().unwrap();
    let registry = manifest_with_tarball(&server);

    let merged = downloader().download(&registry, target.path()).await.unwrap();
    assert_eq!(merged, registry);
    assert_eq!(dir_entries(target.path()), vec!["package.json"]);
}

#[tokio::test]
async fn oversized_archives_fail_unrecoverably_and_leave_nothing_behind() {
    let server = MockServer::start().await;
    mount_tarball(&server, vec![0u8; 100]).await;

    let target = tempfile::tempdir().unwrap();
    let registry = manifest_with_tarball(&server);

    let downloader = Downloader::new(DownloadOptions {
        max_size: 8,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
        },
        ..DownloadOptions::default()
    })
    .unwrap();

    let err = downloader.download(&registry, target.path()).await.unwrap_err();
    assert_eq!(err.kind(), DownloadErrorKind::TooLarge);
    assert!(err.is_unrecoverable());
    assert!(err.to_string().contains("too large"));
    assert!(dir_entries(target.path()).is_empty());

    // One request is enough: size breaches must not be retried.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn broken_embedded_manifest_reduces_to_name_and_dist() {
    let server = MockServer::start().await;
    mount_tarball(&server, tarball(&[("package/package.json", b"{ not json at all")])).await;

    let target = tempfile::tempdir().unwrap();
    let registry = manifest_with_tarball(&server);

    let merged = downloader().download(&registry, target.path()).await.unwrap();
    assert_eq!(merged.name, "cool-module");
    assert_eq!(merged.tarball(), registry.tarball());
    assert!(merged.rest.is_empty());

    let on_disk: Value = serde_json::from_slice(&fs::read(target.path().join("package.json")).unwrap()).unwrap();
    let mut keys: Vec<_> = on_disk.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["dist", "name"]);
}

#[tokio::test]
async fn malformed_tarball_urls_are_unrecoverable() {
    let target = tempfile::tempdir().unwrap();
    let mut registry = PackageManifest::new("cool-module");
    registry.dist = Some(Dist {
        tarball: Some("not a url at all".to_owned()),
        rest: Map::new(),
    });

    let err = downloader().download(&registry, target.path()).await.unwrap_err();
    assert_eq!(err.kind(), DownloadErrorKind::InvalidTarballUrl);
    assert!(err.is_unrecoverable());
    assert!(dir_entries(target.path()).is_empty());
}

#[tokio::test]
async fn corrupt_archives_are_flagged_and_leave_nothing_behind() {
    let server = MockServer::start().await;
    mount_tarball(&server, b"definitely not a gzip stream".to_vec()).await;

    let target = tempfile::tempdir().unwrap();
    let registry = manifest_with_tarball(&server);

    let err = downloader().download(&registry, target.path()).await.unwrap_err();
    assert_eq!(err.kind(), DownloadErrorKind::CorruptArchive);
    assert!(err.is_unrecoverable());
    assert!(dir_entries(target.path()).is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(TARBALL_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_tarball(
        &server,
        tarball(&[("package/package.json", br#"{ "name": "cross-spawn", "version": "0.1.0" }"#)]),
    )
    .await;

    let target = tempfile::tempdir().unwrap();
    let registry = manifest_with_tarball(&server);

    let merged = downloader().download(&registry, target.path()).await.unwrap();
    assert_eq!(merged.name, "cross-spawn");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
