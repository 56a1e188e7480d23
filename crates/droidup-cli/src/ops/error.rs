//! Errors that end an update run.

use crate::config::ConfigError;
use droidup_core::cache::EvictionError;
use droidup_core::catalog::CatalogError;
use droidup_core::device::DeviceError;
use droidup_core::download::FetchError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Lister jar not found: {0}")]
    MissingLister(PathBuf),

    #[error("Could not determine the droidup home directory; set DROIDUP_HOME")]
    NoHome,

    #[error("No repositories configured and none could be discovered")]
    NoRepos,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Repository discovery failed: {0}")]
    Discovery(#[from] CatalogError),

    #[error("Validator cache: {0}")]
    Validators(#[from] FetchError),

    #[error("Cache eviction failed: {0}")]
    Eviction(#[from] EvictionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted")]
    Interrupted,
}

impl UpdateError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => 0,
            Self::Config(_) | Self::MissingLister(_) | Self::NoHome | Self::NoRepos => 2,
            _ => 1,
        }
    }
}
