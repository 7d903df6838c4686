//! The registry package descriptor.
//!
//! Only the fields the collection pipeline acts on are typed; everything else
//! the registry reports (version, description, scripts, ...) rides along in a
//! flattened map so the document round-trips losslessly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A package manifest as reported by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<ManifestRepository>,

    /// Commit the published version was cut from, when the publisher recorded it.
    #[serde(rename = "gitHead", default, skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Dist>,

    /// Pass-through registry fields not interpreted by the pipeline.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// The `repository` field of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRepository {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub url: String,
}

/// The `dist` field of a manifest, describing the published archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,

    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl PackageManifest {
    /// Create a minimal manifest with just a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repository: None,
            git_head: None,
            dist: None,
            rest: Map::new(),
        }
    }

    /// The declared tarball URL, if the registry published one.
    #[must_use]
    pub fn tarball(&self) -> Option<&str> {
        self.dist.as_ref().and_then(|d| d.tarball.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_unknown_fields() {
        let json = r#"{
            "name": "cross-spawn",
            "version": "0.1.0",
            "description": "Cross platform child_process#spawn",
            "gitHead": "7bc71932e517c974c80f54ae9f7687c9cd25db74",
            "dist": { "tarball": "https://registry.npmjs.org/cross-spawn/-/cross-spawn-0.1.0.tgz", "shasum": "abc" }
        }"#;

        let manifest: PackageManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.name, "cross-spawn");
        assert_eq!(manifest.git_head.as_deref(), Some("7bc71932e517c974c80f54ae9f7687c9cd25db74"));
        assert_eq!(
            manifest.tarball(),
            Some("https://registry.npmjs.org/cross-spawn/-/cross-spawn-0.1.0.tgz")
        );
        assert_eq!(manifest.rest.get("version"), Some(&Value::String("0.1.0".into())));

        let back = serde_json::to_value(&manifest).unwrap();
        assert_eq!(back.get("version"), Some(&Value::String("0.1.0".into())));
        assert_eq!(back.get("gitHead").and_then(Value::as_str), Some("7bc71932e517c974c80f54ae9f7687c9cd25db74"));
        assert_eq!(back.pointer("/dist/shasum").and_then(Value::as_str), Some("abc"));
    }

    #[test]
    fn minimal_manifest_serializes_without_optional_fields() {
        let manifest = PackageManifest::new("cool-module");
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value, serde_json::json!({ "name": "cool-module" }));
    }
}
