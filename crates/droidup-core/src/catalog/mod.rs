//! Repository catalogs: refresh into the index mirror and lazy parsing.
//!
//! A catalog publishing `entry.json` uses the v2 schema; the entry names the
//! index file and carries a publication timestamp used as freshness hint.
//! Anything else falls back to `index-v1.json`.

pub mod discovery;

use crate::download::{FetchError, FetchRequest, ValidatorStore, fetch_conditional};
use crate::paths::{InvalidUrl, cache_file, join_locator};
use crate::resolver::CatalogRef;
use droidup_schema::index::{ENTRY, INDEX_V1};
use droidup_schema::{CatalogEntry, IndexError, IndexV1, IndexV2, PackageCatalog};
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while refreshing, loading or discovering catalogs.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The address and locator do not form a URL.
    #[error(transparent)]
    Url(#[from] InvalidUrl),

    /// The index or entry document could not be fetched.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Neither a fresh nor a mirrored index exists for the named catalog.
    #[error("No index available for {0}")]
    NoIndex(String),

    /// The mirrored index does not parse.
    #[error("Invalid index: {0}")]
    Index(#[from] IndexError),

    /// `entry.json` does not parse.
    #[error("Invalid entry document: {0}")]
    Entry(#[from] serde_json::Error),

    /// The F-Droid client database could not be read.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Local IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A configured repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    /// Display name.
    pub name: String,
    /// Base address; locators resolve against it.
    pub address: String,
}

/// One repository with its own HTTP session and cached index.
#[derive(Debug)]
pub struct Catalog {
    repo: RepoSpec,
    client: Client,
    index_file: Option<PathBuf>,
    index: Option<Box<dyn PackageCatalog>>,
}

impl Catalog {
    /// Catalog for `repo`, picking up an index left in `index_root` by an
    /// earlier refresh.
    pub fn new(repo: RepoSpec, index_root: &Path) -> Self {
        let index_file = cached_index(&repo.address, index_root);
        Self {
            repo,
            client: Client::new(),
            index_file,
            index: None,
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.repo.name
    }

    /// Base address.
    pub fn address(&self) -> &str {
        &self.repo.address
    }

    /// The HTTP session of this catalog.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Path of the index file the next [`Catalog::load`] will parse.
    pub fn index_file(&self) -> Option<&Path> {
        self.index_file.as_deref()
    }

    /// Refresh the mirrored index with conditional fetches.
    ///
    /// # Errors
    ///
    /// Returns an error if neither schema could be fetched, or the entry
    /// document is malformed.
    pub async fn refresh(
        &mut self,
        index_root: &Path,
        validators: &ValidatorStore,
    ) -> Result<(), CatalogError> {
        let entry_url = join_locator(&self.repo.address, ENTRY)?;
        let entry_dest = cache_file(index_root, entry_url.as_str())?;
        let entry_req = FetchRequest::new(entry_url.as_str(), &entry_dest);

        let index_file = match fetch_conditional(&self.client, &entry_req, validators).await {
            Ok(_) => {
                let entry: CatalogEntry =
                    serde_json::from_slice(&tokio::fs::read(&entry_dest).await?)?;
                let url = join_locator(&self.repo.address, &entry.index.name)?;
                let dest = cache_file(index_root, url.as_str())?;
                let req = FetchRequest::new(url.as_str(), &dest).fresh_after(entry.timestamp_secs());
                fetch_conditional(&self.client, &req, validators).await?;
                dest
            }
            Err(FetchError::Status { status, .. }) => {
                tracing::debug!("{}: no {ENTRY} (HTTP {status}), using {INDEX_V1}", self.repo.name);
                let url = join_locator(&self.repo.address, INDEX_V1)?;
                let dest = cache_file(index_root, url.as_str())?;
                fetch_conditional(&self.client, &FetchRequest::new(url.as_str(), &dest), validators)
                    .await?;
                dest
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Refreshed {} ({})", self.repo.name, index_file.display());
        self.index_file = Some(index_file);
        self.index = None;
        Ok(())
    }

    /// Parse the mirrored index, once.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NoIndex`] if nothing was ever mirrored, or a
    /// parse error.
    pub fn load(&mut self) -> Result<&dyn PackageCatalog, CatalogError> {
        if self.index.is_none() {
            let path = self
                .index_file
                .as_deref()
                .ok_or_else(|| CatalogError::NoIndex(self.repo.name.clone()))?;
            let bytes = std::fs::read(path)?;
            let index: Box<dyn PackageCatalog> =
                if path.file_name().is_some_and(|n| n == INDEX_V1) {
                    Box::new(IndexV1::from_slice(&bytes)?)
                } else {
                    Box::new(IndexV2::from_slice(&bytes)?)
                };
            tracing::info!("{}: {} packages", self.repo.name, index.package_count());
            self.index = Some(index);
        }
        self.index
            .as_deref()
            .ok_or_else(|| CatalogError::NoIndex(self.repo.name.clone()))
    }

    /// The parsed index, if [`Catalog::load`] succeeded.
    pub fn loaded(&self) -> Option<CatalogRef<'_>> {
        self.index.as_deref().map(|index| CatalogRef {
            name: &self.repo.name,
            address: &self.repo.address,
            index,
        })
    }
}

/// Locate an index mirrored by an earlier run, preferring v2.
fn cached_index(address: &str, index_root: &Path) -> Option<PathBuf> {
    let entry = join_locator(address, ENTRY).ok()?;
    let entry_path = cache_file(index_root, entry.as_str()).ok()?;
    if let Ok(bytes) = std::fs::read(&entry_path)
        && let Ok(entry) = serde_json::from_slice::<CatalogEntry>(&bytes)
        && let Ok(url) = join_locator(address, &entry.index.name)
        && let Ok(path) = cache_file(index_root, url.as_str())
        && path.is_file()
    {
        return Some(path);
    }

    let v1 = join_locator(address, INDEX_V1).ok()?;
    cache_file(index_root, v1.as_str())
        .ok()
        .filter(|p| p.is_file())
}

/// Refresh every catalog concurrently, each over its own session.
///
/// Returns one result per catalog, in order. A failed refresh leaves any
/// previously mirrored index usable.
pub async fn refresh_all(
    catalogs: &mut [Catalog],
    index_root: &Path,
    validators: &ValidatorStore,
) -> Vec<Result<(), CatalogError>> {
    join_all(
        catalogs
            .iter_mut()
            .map(|catalog| catalog.refresh(index_root, validators)),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidup_schema::VersionCode;
    use tempfile::TempDir;

    const V1: &str = r#"{
        "apps": [{"packageName": "org.example", "localized": {"en-US": {"name": "Example"}}}],
        "packages": {
            "org.example": [
                {"versionCode": 12, "versionName": "1.2", "apkName": "org.example_12.apk"}
            ]
        }
    }"#;

    const V2: &str = r#"{
        "packages": {
            "org.example": {
                "metadata": {"name": {"en-US": "Example"}},
                "versions": {
                    "aa": {
                        "file": {"name": "/org.example_30.apk", "sha256": "aa"},
                        "manifest": {"versionCode": 30, "versionName": "3.0"}
                    }
                }
            }
        }
    }"#;

    fn repo(server: &mockito::Server) -> RepoSpec {
        RepoSpec {
            name: "Test".into(),
            address: format!("{}/repo", server.url()),
        }
    }

    #[tokio::test]
    async fn test_v2_entry_names_index() {
        let mut server = mockito::Server::new_async().await;
        let entry = server
            .mock("GET", "/repo/entry.json")
            .with_body(r#"{"timestamp": 1000, "index": {"name": "/index-v2.json"}}"#)
            .create_async()
            .await;
        let index = server
            .mock("GET", "/repo/index-v2.json")
            .with_body(V2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::new(repo(&server), dir.path());
        assert!(catalog.index_file().is_none());

        catalog
            .refresh(dir.path(), &ValidatorStore::in_memory())
            .await
            .unwrap();
        entry.assert_async().await;
        index.assert_async().await;

        let c = catalog.load().unwrap().candidates_for("org.example");
        assert_eq!(c[0].version_code, VersionCode(30));
        let loaded = catalog.loaded().unwrap();
        assert_eq!(loaded.name, "Test");
    }

    #[tokio::test]
    async fn test_falls_back_to_v1() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repo/entry.json")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/repo/index-v1.json")
            .with_body(V1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut catalog = Catalog::new(repo(&server), dir.path());
        catalog
            .refresh(dir.path(), &ValidatorStore::in_memory())
            .await
            .unwrap();

        assert!(catalog.index_file().unwrap().ends_with(INDEX_V1));
        let c = catalog.load().unwrap().candidates_for("org.example");
        assert_eq!(c[0].label, "Example");
        assert_eq!(c[0].version_code, VersionCode(12));
    }

    #[tokio::test]
    async fn test_mirror_survives_restart() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repo/entry.json")
            .with_body(r#"{"timestamp": 1000, "index": {"name": "index-v2.json"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repo/index-v2.json")
            .with_body(V2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut first = Catalog::new(repo(&server), dir.path());
        first
            .refresh(dir.path(), &ValidatorStore::in_memory())
            .await
            .unwrap();

        let mut second = Catalog::new(repo(&server), dir.path());
        assert_eq!(second.index_file(), first.index_file());
        assert_eq!(second.load().unwrap().package_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_catalog() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut catalogs = vec![
            Catalog::new(repo(&server), dir.path()),
            Catalog::new(
                RepoSpec {
                    name: "Bad".into(),
                    address: "not a url".into(),
                },
                dir.path(),
            ),
        ];
        let results = refresh_all(&mut catalogs, dir.path(), &ValidatorStore::in_memory()).await;

        assert!(matches!(
            results[0],
            Err(CatalogError::Fetch(FetchError::Status { .. }))
        ));
        assert!(matches!(results[1], Err(CatalogError::Url(_))));
        assert!(matches!(catalogs[0].load(), Err(CatalogError::NoIndex(_))));
    }
}
