//! droidup - keep sideloaded Android apps up to date
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Enumerates the apps installed on an attached device over `adb`, checks
//! them against F-Droid style repositories, downloads the newer builds and
//! installs them.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.droidup/
//! ├── config.toml      # User configuration
//! └── cache/
//!     ├── cache.toml   # HTTP validators
//!     ├── fdroid_db    # Repository list pulled from the F-Droid client
//!     ├── index/       # Mirrored catalog indexes by URL
//!     └── apps/        # Downloaded artifacts by URL
//! ```

pub mod adb;
pub mod config;
pub mod ops;
pub mod ui;

pub use droidup_core::paths::*;

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "droidup")]
#[command(author, version, about = "Update sideloaded Android apps from F-Droid repositories")]
pub struct Cli {
    /// Check for updates without downloading or installing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file (defaults to config.toml in the droidup home)
    #[arg(long, env = "DROIDUP_CONFIG")]
    pub config: Option<PathBuf>,
}
