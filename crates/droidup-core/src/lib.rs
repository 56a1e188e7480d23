//! Core library for droidup.
//!
//! Two halves live here:
//!
//! - [`io`]: the chunk-to-stream adapter, streaming inflate stages and the
//!   forward-only backup extractor used to talk to the device.
//! - [`catalog`], [`resolver`], [`download`] and [`cache`]: reconciling the
//!   installed apps against repository catalogs and fetching the updates.

pub mod cache;
pub mod catalog;
pub mod device;
pub mod download;
pub mod inventory;
pub mod io;
/// Home layout and URL-to-cache-path mapping.
pub mod paths;
pub mod reporter;
/// Device compatibility and cross-catalog reconciliation.
pub mod resolver;

pub use paths::*;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for catalog and artifact requests
pub const USER_AGENT: &str = concat!("droidup/", env!("CARGO_PKG_VERSION"));
