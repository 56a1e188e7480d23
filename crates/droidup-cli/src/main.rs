//! droidup - update sideloaded Android apps

use anyhow::{Context as _, Result};
use clap::Parser;
use droidup_cli::adb::AdbConnector;
use droidup_cli::config::UpdaterConfig;
use droidup_cli::ops::{Context, UpdateError, update};
use droidup_cli::ui::Output;
use droidup_cli::{Cli, Paths};
use droidup_core::Reporter;
use droidup_core::device::DeviceSession;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new();
    let cancel = CancellationToken::new();
    // The listener runs on a worker thread, so Ctrl-C is seen even while the
    // run is blocked in a device command.
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Received Ctrl-C");
                cancel.cancel();
            }
        }
    });

    // Partial downloads stay as .part files.
    let code = tokio::select! {
        result = run(&cli, output.clone(), cancel.clone()) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) if matches!(e.downcast_ref::<UpdateError>(), Some(UpdateError::Interrupted)) => {
                output.warning("Interrupted");
                ExitCode::SUCCESS
            }
            Err(e) => {
                output.error(&format!("{e:#}"));
                ExitCode::from(e.downcast_ref::<UpdateError>().map_or(1, UpdateError::exit_code))
            }
        },
        () = cancel.cancelled() => {
            output.warning("Interrupted");
            ExitCode::SUCCESS
        }
    };
    output.wait();
    code
}

async fn run(cli: &Cli, output: Output, cancel: CancellationToken) -> Result<()> {
    let paths = Paths::discover().ok_or(UpdateError::NoHome)?;
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config.clone());
    let config = UpdaterConfig::load(&config_path)
        .map_err(UpdateError::from)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    tracing::debug!("Loaded config from {}", config_path.display());

    let mut ctx = Context::new(paths, config, config_path, output);
    ctx.dry_run = cli.dry_run;
    ctx.assume_yes = cli.yes;
    ctx.cancel = cancel;

    let mut session = DeviceSession::new(AdbConnector::locate().map_err(UpdateError::from)?);
    let summary = update(&ctx, &mut session).await?;
    tracing::debug!("{summary:?}");
    Ok(())
}
