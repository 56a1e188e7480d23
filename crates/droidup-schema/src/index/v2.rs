use super::{Candidate, LOCALE, PackageCatalog, ordered_values};
use crate::types::{PackageId, VersionCode};
use serde::Deserialize;
use std::collections::HashMap;

/// The nested v2 index document.
#[derive(Debug, Deserialize)]
pub struct IndexV2 {
    /// Packages keyed by application id.
    #[serde(default)]
    pub packages: HashMap<String, V2Package>,
}

/// One package with embedded metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct V2Package {
    /// Display metadata.
    #[serde(default)]
    pub metadata: V2Metadata,
    /// Versions in declaration order (the source is a map keyed by file digest).
    #[serde(deserialize_with = "ordered_values::deserialize")]
    pub versions: Vec<V2Version>,
}

/// Package metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct V2Metadata {
    /// Localized names.
    #[serde(default)]
    pub name: HashMap<String, String>,
}

/// One published version.
#[derive(Debug, Clone, Deserialize)]
pub struct V2Version {
    /// Artifact file.
    pub file: V2File,
    /// Parsed APK manifest.
    pub manifest: V2Manifest,
}

/// Artifact location and digest.
#[derive(Debug, Clone, Deserialize)]
pub struct V2File {
    /// Path relative to the repository address (leading `/`).
    pub name: String,
    /// SHA-256 of the file.
    #[serde(default)]
    pub sha256: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

/// Manifest subset relevant to compatibility.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2Manifest {
    /// Version code.
    pub version_code: VersionCode,
    /// Version name.
    #[serde(default)]
    pub version_name: String,
    /// SDK bounds.
    #[serde(default)]
    pub uses_sdk: Option<V2UsesSdk>,
    /// Native ABIs.
    #[serde(default)]
    pub nativecode: Vec<String>,
    /// Signing certificates.
    #[serde(default)]
    pub signer: Option<V2Signer>,
}

/// `usesSdk` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2UsesSdk {
    /// Lowest supported SDK.
    #[serde(default = "default_min_sdk")]
    pub min_sdk_version: u32,
}

/// `signer` block.
#[derive(Debug, Clone, Deserialize)]
pub struct V2Signer {
    /// Certificate digests; the first one identifies the signer.
    #[serde(default)]
    pub sha256: Vec<String>,
}

fn default_min_sdk() -> u32 {
    1
}

impl IndexV2 {
    /// Parse an index from its JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`super::IndexError::Json`] if the document does not match the schema.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, super::IndexError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl PackageCatalog for IndexV2 {
    fn candidates_for(&self, id: &str) -> Vec<Candidate> {
        let Some(package) = self.packages.get(id) else {
            return Vec::new();
        };
        let label = package
            .metadata
            .name
            .get(LOCALE)
            .or_else(|| package.metadata.name.values().next())
            .cloned()
            .unwrap_or_else(|| id.to_string());

        package
            .versions
            .iter()
            .map(|v| Candidate {
                package: PackageId::new(id),
                label: label.clone(),
                version_code: v.manifest.version_code,
                version_name: v.manifest.version_name.clone(),
                min_sdk: v
                    .manifest
                    .uses_sdk
                    .as_ref()
                    .map_or(1, |s| s.min_sdk_version),
                abis: v.manifest.nativecode.clone(),
                signer: v
                    .manifest
                    .signer
                    .as_ref()
                    .and_then(|s| s.sha256.first().cloned()),
                locator: v.file.name.clone(),
                sha256: v.file.sha256.clone(),
            })
            .collect()
    }

    fn package_count(&self) -> usize {
        self.packages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "repo": {"timestamp": 1700000000000},
        "packages": {
            "org.example": {
                "metadata": {"name": {"en-US": "Example"}},
                "versions": {
                    "ffff": {
                        "file": {"name": "/org.example_30.apk", "sha256": "ffff", "size": 10},
                        "manifest": {"versionCode": 30, "versionName": "3.0",
                                     "usesSdk": {"minSdkVersion": 26, "targetSdkVersion": 34},
                                     "signer": {"sha256": ["sig"]}}
                    },
                    "0000": {
                        "file": {"name": "/org.example_20.apk", "sha256": "0000"},
                        "manifest": {"versionCode": 20, "versionName": "2.0",
                                     "nativecode": ["x86_64"]}
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_versions_keep_document_order() {
        let index = IndexV2::from_slice(INDEX.as_bytes()).unwrap();
        let c = index.candidates_for("org.example");
        let codes: Vec<u64> = c.iter().map(|c| c.version_code.0).collect();
        // "ffff" sorts after "0000" but is declared first.
        assert_eq!(codes, vec![30, 20]);
    }

    #[test]
    fn test_manifest_fields_are_normalized() {
        let index = IndexV2::from_slice(INDEX.as_bytes()).unwrap();
        let c = index.candidates_for("org.example");
        assert_eq!(c[0].label, "Example");
        assert_eq!(c[0].min_sdk, 26);
        assert_eq!(c[0].signer.as_deref(), Some("sig"));
        assert_eq!(c[0].locator, "/org.example_30.apk");
        assert_eq!(c[1].min_sdk, 1);
        assert_eq!(c[1].abis, vec!["x86_64"]);
        assert_eq!(c[1].signer, None);
    }
}
