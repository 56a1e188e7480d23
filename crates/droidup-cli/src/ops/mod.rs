//! The update run and its steps.

pub mod context;
pub mod error;
pub mod update;

pub use context::Context;
pub use error::UpdateError;
pub use update::{UpdateSummary, update};
