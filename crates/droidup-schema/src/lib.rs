//! Shared types and wire formats for droidup.
//!
//! Everything here is plain data: the newtypes used across the workspace,
//! the device enumeration report, and the two catalog index schemas
//! normalized behind [`PackageCatalog`].

pub mod app;
pub mod index;
/// Package id and version code newtypes.
pub mod types;

// Re-exports
pub use app::*;
pub use index::{Candidate, CatalogEntry, IndexError, IndexV1, IndexV2, PackageCatalog};
pub use types::*;

/// Package id of the F-Droid client, whose backup holds the configured repositories.
pub const FDROID_APP: &str = "org.fdroid.fdroid";
