use super::{Candidate, LOCALE, PackageCatalog};
use crate::types::{PackageId, VersionCode};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::OnceLock;

/// The flat `index-v1.json` document.
#[derive(Debug, Deserialize)]
pub struct IndexV1 {
    /// Display metadata, one entry per package, in no particular order.
    #[serde(default)]
    pub apps: Vec<V1App>,
    /// Versions per package, newest first as published.
    #[serde(default)]
    pub packages: HashMap<String, Vec<V1Version>>,
    /// Position of each package inside `apps`, built on first lookup.
    #[serde(skip)]
    app_positions: OnceLock<HashMap<String, usize>>,
}

/// Display metadata of one package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1App {
    /// Application id.
    pub package_name: String,
    /// Unlocalized name (older indexes).
    #[serde(default)]
    pub name: Option<String>,
    /// Localized metadata keyed by locale.
    #[serde(default)]
    pub localized: HashMap<String, V1Localized>,
}

/// Localized metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct V1Localized {
    /// Localized display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// One published version.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Version {
    /// Version code.
    pub version_code: VersionCode,
    /// Version name.
    #[serde(default)]
    pub version_name: String,
    /// File name of the APK, relative to the repository address.
    pub apk_name: String,
    /// Artifact digest.
    #[serde(default)]
    pub hash: Option<String>,
    /// Algorithm of `hash`.
    #[serde(default)]
    pub hash_type: Option<String>,
    /// Minimum SDK; some generators emit it as a string.
    #[serde(default, deserialize_with = "lenient_u32")]
    pub min_sdk_version: Option<u32>,
    /// Native ABIs.
    #[serde(default)]
    pub nativecode: Vec<String>,
    /// Signing certificate digest.
    #[serde(default)]
    pub signer: Option<String>,
}

impl IndexV1 {
    /// Parse an index from its JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`super::IndexError::Json`] if the document does not match the schema.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, super::IndexError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn label_for(&self, id: &str) -> String {
        let positions = self.app_positions.get_or_init(|| {
            self.apps
                .iter()
                .enumerate()
                .map(|(i, app)| (app.package_name.clone(), i))
                .collect()
        });

        positions
            .get(id)
            .map(|&i| &self.apps[i])
            .and_then(|app| {
                app.localized
                    .get(LOCALE)
                    .and_then(|l| l.name.clone())
                    .or_else(|| app.name.clone())
            })
            .unwrap_or_else(|| id.to_string())
    }
}

impl PackageCatalog for IndexV1 {
    fn candidates_for(&self, id: &str) -> Vec<Candidate> {
        let Some(versions) = self.packages.get(id) else {
            return Vec::new();
        };
        let label = self.label_for(id);

        versions
            .iter()
            .map(|v| Candidate {
                package: PackageId::new(id),
                label: label.clone(),
                version_code: v.version_code,
                version_name: v.version_name.clone(),
                min_sdk: v.min_sdk_version.unwrap_or(1),
                abis: v.nativecode.clone(),
                signer: v.signer.clone(),
                locator: v.apk_name.clone(),
                sha256: match v.hash_type.as_deref() {
                    Some("sha256") | None => v.hash.clone(),
                    Some(_) => None,
                },
            })
            .collect()
    }

    fn package_count(&self) -> usize {
        self.packages.len()
    }
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u32),
        Str(String),
    }

    match Option::<NumOrStr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}
