//! Reconciliation of the archive's embedded manifest with the registry's.
//!
//! The archive is untrusted content: a clean embedded manifest wins
//! field-by-field, a broken one collapses the result to a minimal allowlist
//! so downstream never sees a half-merged document.

use crate::manifest::PackageManifest;
use serde_json::{Map, Value};

const LOG_TARGET: &str = "     merge";

/// Merge the manifest extracted from the archive onto the registry manifest.
///
/// - no embedded manifest: the registry manifest unchanged;
/// - embedded manifest parses: its fields take precedence;
/// - embedded manifest is broken: only `fallback_fields` of the registry
///   manifest survive.
pub(crate) fn merge_manifest(registry: &PackageManifest, embedded: Option<&[u8]>, fallback_fields: &[String]) -> PackageManifest {
    let Some(bytes) = embedded else {
        return registry.clone();
    };

    let embedded_map = match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            log::warn!(
                target: LOG_TARGET,
                "Embedded manifest for '{}' is broken, keeping only [{}]",
                registry.name,
                fallback_fields.join(", ")
            );
            return fallback_manifest(registry, fallback_fields);
        }
    };

    let mut merged = manifest_fields(registry);
    for (key, value) in embedded_map {
        let _ = merged.insert(key, value);
    }

    match serde_json::from_value(Value::Object(merged)) {
        Ok(manifest) => manifest,
        Err(e) => {
            // Structurally valid JSON that still breaks the manifest shape
            // (e.g. a string `dist`) gets the same treatment as garbage.
            log::warn!(
                target: LOG_TARGET,
                "Embedded manifest for '{}' does not fit the manifest shape ({e}), keeping only [{}]",
                registry.name,
                fallback_fields.join(", ")
            );
            fallback_manifest(registry, fallback_fields)
        }
    }
}

/// Reduce the registry manifest to the minimal authoritative fields.
fn fallback_manifest(registry: &PackageManifest, fallback_fields: &[String]) -> PackageManifest {
    let full = manifest_fields(registry);
    let mut kept = Map::new();

    for field in fallback_fields {
        if let Some(value) = full.get(field) {
            let _ = kept.insert(field.clone(), value.clone());
        }
    }

    serde_json::from_value(Value::Object(kept)).unwrap_or_else(|_| PackageManifest::new(registry.name.clone()))
}

fn manifest_fields(manifest: &PackageManifest) -> Map<String, Value> {
    match serde_json::to_value(manifest) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
