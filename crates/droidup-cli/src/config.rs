//! User configuration (`config.toml`).

use droidup_core::cache::{EvictionError, EvictionPolicy, parse_size};
use droidup_core::catalog::RepoSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml_edit::{ArrayOfTables, DocumentMut, Item, Table, value};

/// Package ignored unless the user says otherwise.
pub const DEFAULT_IGNORED: &str = "ignore.during.updates";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config document: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("Invalid cache.apps.max_size: {0}")]
    Size(#[from] EvictionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Packages never updated.
    pub ignore_pkg: Vec<String>,
    /// Concurrent artifact downloads.
    pub parallel_downloads: usize,
    /// Lister jar used for enumeration; `dumpsys` is parsed without it.
    pub lister_jar: Option<PathBuf>,
    pub cache: CacheConfig,
    /// Repositories in priority order.
    pub repos: Vec<RepoSpec>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            ignore_pkg: vec![DEFAULT_IGNORED.to_string()],
            parallel_downloads: 4,
            lister_jar: None,
            cache: CacheConfig::default(),
            repos: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub apps: AppsCacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsCacheConfig {
    /// Artifacts this many days old are evicted.
    pub max_days: u64,
    /// Artifact cache budget, e.g. `1G`.
    pub max_size: String,
}

impl Default for AppsCacheConfig {
    fn default() -> Self {
        Self {
            max_days: 30,
            max_size: "1G".to_string(),
        }
    }
}

impl AppsCacheConfig {
    pub fn policy(&self) -> Result<EvictionPolicy, EvictionError> {
        Ok(EvictionPolicy {
            max_days: self.max_days,
            max_size: parse_size(&self.max_size)?,
        })
    }
}

impl UpdaterConfig {
    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let mut config: Self = toml::from_str(&content)?;
        config.parallel_downloads = config.parallel_downloads.max(1);
        config.cache.apps.policy()?;
        Ok(config)
    }

    pub fn ignore_set(&self) -> HashSet<String> {
        self.ignore_pkg.iter().cloned().collect()
    }
}

/// Replace the `[[repos]]` of the config at `path`, keeping everything else
/// in the document as written.
pub fn save_repos(path: &Path, repos: &[RepoSpec]) -> Result<(), ConfigError> {
    let mut doc = match std::fs::read_to_string(path) {
        Ok(content) => content.parse::<DocumentMut>()?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DocumentMut::new(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut tables = ArrayOfTables::new();
    for repo in repos {
        let mut table = Table::new();
        table["name"] = value(repo.name.as_str());
        table["address"] = value(repo.address.as_str());
        tables.push(table);
    }
    doc["repos"] = Item::ArrayOfTables(tables);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, doc.to_string())?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
