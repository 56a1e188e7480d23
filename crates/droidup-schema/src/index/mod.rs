//! Catalog index formats.
//!
//! F-Droid style repositories publish one of two index schemas:
//!
//! - **v1** (`index-v1.json`): a flat per-version list under `packages`,
//!   with display metadata kept apart in an `apps` list.
//! - **v2** (`entry.json` + the index file it names): a nested map per
//!   package with metadata and versions embedded.
//!
//! Both normalize to [`PackageCatalog::candidates_for`], so the resolver
//! never sees which schema a repository uses.

mod v1;
mod v2;

pub use v1::{IndexV1, V1App, V1Version};
pub use v2::{IndexV2, V2File, V2Manifest, V2Package, V2Version};

use crate::types::{PackageId, VersionCode};
use serde::{Deserialize, Serialize};

/// File name of the flat index.
pub const INDEX_V1: &str = "index-v1.json";

/// File name of the v2 entry point.
pub const ENTRY: &str = "entry.json";

/// Locale used for display metadata.
pub const LOCALE: &str = "en-US";

/// One downloadable version of a package in one catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Application id.
    pub package: PackageId,
    /// Display label.
    pub label: String,
    /// Version code.
    pub version_code: VersionCode,
    /// Version name.
    pub version_name: String,
    /// Lowest SDK level the build runs on.
    pub min_sdk: u32,
    /// Native ABIs the build ships; empty means ABI independent.
    pub abis: Vec<String>,
    /// SHA-256 of the signing certificate.
    pub signer: Option<String>,
    /// Download location relative to the catalog address.
    pub locator: String,
    /// SHA-256 of the artifact, when published.
    pub sha256: Option<String>,
}

/// Uniform read access to a parsed catalog index.
pub trait PackageCatalog: Send + Sync + std::fmt::Debug {
    /// Every version of `id`, in the order the catalog declares them.
    fn candidates_for(&self, id: &str) -> Vec<Candidate>;

    /// Number of packages in the index.
    fn package_count(&self) -> usize;
}

/// The v2 `entry.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    /// Publication time in milliseconds since the epoch.
    pub timestamp: i64,
    /// Pointer to the full index.
    pub index: EntryIndex,
}

/// The `index` field of [`CatalogEntry`].
#[derive(Debug, Clone, Deserialize)]
pub struct EntryIndex {
    /// Path of the index file relative to the repository address.
    pub name: String,
}

impl CatalogEntry {
    /// Publication time in whole seconds.
    pub fn timestamp_secs(&self) -> i64 {
        self.timestamp / 1000
    }
}

/// Errors produced while parsing an index.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The document is not valid JSON for the expected schema.
    #[error("Invalid index document: {0}")]
    Json(#[from] serde_json::Error),

    /// The index file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Deserialize a JSON object into a `Vec` of values, keeping document order.
///
/// `serde_json`'s map type sorts keys unless `preserve_order` is enabled, and
/// v2 version maps rely on declaration order for ties.
pub(crate) mod ordered_values {
    use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
    use std::fmt;
    use std::marker::PhantomData;

    pub(crate) fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct ValuesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for ValuesVisitor<V> {
            type Value = Vec<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((_key, value)) = map.next_entry::<serde::de::IgnoredAny, V>()? {
                    out.push(value);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(ValuesVisitor(PhantomData))
    }
}
