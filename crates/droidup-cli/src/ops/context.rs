//! State shared by the steps of an update run.

use crate::config::UpdaterConfig;
use crate::ui::Output;
use droidup_core::Paths;
use super::UpdateError;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Context {
    pub paths: Paths,
    pub config: UpdaterConfig,
    /// Where discovered repositories are written back.
    pub config_path: PathBuf,
    pub output: Output,
    /// Stop after listing the available updates.
    pub dry_run: bool,
    /// Do not ask before downloading.
    pub assume_yes: bool,
    /// Tripped by Ctrl-C.
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(paths: Paths, config: UpdaterConfig, config_path: PathBuf, output: Output) -> Self {
        Self {
            paths,
            config,
            config_path,
            output,
            dry_run: false,
            assume_yes: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Fail with [`UpdateError::Interrupted`] once the run was cancelled.
    ///
    /// Device commands block the run, so this is checked around them.
    pub fn checkpoint(&self) -> Result<(), UpdateError> {
        if self.cancel.is_cancelled() {
            return Err(UpdateError::Interrupted);
        }
        Ok(())
    }
}
