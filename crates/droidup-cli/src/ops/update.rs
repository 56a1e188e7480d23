//! The update run: repositories, device, reconciliation, downloads, installs.
//!
//! Device calls block the current task. Nothing else runs while they do:
//! catalog refreshes are joined before enumeration and installs start only
//! after the download batch has finished. Ctrl-C cannot preempt a blocked
//! call, so the cancellation token is checked around each of them.

use super::{Context, UpdateError};
use crate::config::save_repos;
use droidup_core::Reporter;
use droidup_core::cache::evict;
use droidup_core::catalog::discovery::{pull_database, read_repositories};
use droidup_core::catalog::{Catalog, RepoSpec, refresh_all};
use droidup_core::device::{Connector, DeviceSession, DeviceSnapshot};
use droidup_core::download::ValidatorStore;
use droidup_core::download::scheduler::{DownloadTask, HttpFetcher, run_downloads};
use droidup_core::inventory::select_updatable;
use droidup_core::resolver::{CatalogRef, reconcile};
use droidup_schema::{InstalledApp, installer_name};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    pub updates: usize,
    pub downloaded: usize,
    pub installed: usize,
}

pub async fn update<C: Connector>(
    ctx: &Context,
    session: &mut DeviceSession<C>,
) -> Result<UpdateSummary, UpdateError> {
    let out = &ctx.output;
    let paths = &ctx.paths;
    paths.ensure_dirs()?;
    let validators = Arc::new(ValidatorStore::load(&paths.cache_info)?);

    let repos = configured_repos(ctx, session)?;
    ctx.checkpoint()?;

    out.section("Updating repos...");
    let mut catalogs: Vec<Catalog> = repos
        .into_iter()
        .map(|repo| Catalog::new(repo, &paths.index))
        .collect();
    let results = refresh_all(&mut catalogs, &paths.index, &validators).await;
    for (catalog, result) in catalogs.iter().zip(results) {
        match result {
            Ok(()) => out.done(catalog.name(), "", "refreshed", None),
            Err(e) => {
                tracing::warn!("Refresh of {} failed: {e}", catalog.name());
                out.failed(catalog.name(), "", &e.to_string());
            }
        }
    }
    save_validators(ctx, &validators);

    out.section("Enumerating device...");
    let snapshot = enumerate(ctx, session)?;
    ctx.checkpoint()?;
    let profile = &snapshot.profile;
    out.info(&format!(
        "{} ({}), SDK {}, ABIs {}",
        profile.model,
        profile.arch,
        profile.sdk,
        profile.supported_abis.join(", ")
    ));
    let (apps, stats) = select_updatable(snapshot.apps, &ctx.config.ignore_set());
    let counts: Vec<String> = stats
        .rows()
        .iter()
        .map(|(name, count)| format!("{count} {name}"))
        .collect();
    tracing::info!("Enumeration: {}", counts.join(", "));
    out.info(&counts.join(", "));

    out.section("Checking updates...");
    for catalog in &mut catalogs {
        if let Err(e) = catalog.load() {
            tracing::warn!("Skipping {}: {e}", catalog.name());
            out.warning(&format!("{}: {e}", catalog.name()));
        }
    }
    let refs: Vec<CatalogRef<'_>> = catalogs.iter().filter_map(Catalog::loaded).collect();
    let result = reconcile(&snapshot.profile, &apps, &refs);

    for app in &result.missing {
        out.row(&app.label, &installed_version(app), &missing_detail(app));
    }
    for update in &result.updates {
        out.row(
            &update.candidate.label,
            &format!(
                "{} -> {}",
                installed_version(&update.installed),
                update.candidate.version_name
            ),
            &update.catalog_name,
        );
    }

    let mut summary = UpdateSummary {
        updates: result.updates.len(),
        ..UpdateSummary::default()
    };
    if result.updates.is_empty() {
        out.success(&format!("{} apps up to date", result.up_to_date));
        return Ok(summary);
    }
    if ctx.dry_run {
        out.info(&format!("{} updates available (dry run)", summary.updates));
        return Ok(summary);
    }
    if !ctx.assume_yes {
        let question = format!("Download and install {} updates?", summary.updates);
        let confirmed = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(UpdateError::Interrupted),
            answer = out.confirm(&question) => answer?,
        };
        if !confirmed {
            out.info("Nothing changed");
            return Ok(summary);
        }
    }

    let mut tasks = Vec::with_capacity(result.updates.len());
    for update in &result.updates {
        match DownloadTask::for_update(update, &paths.apps) {
            Ok(task) => tasks.push(task),
            Err(e) => out.failed(&update.candidate.label, &update.candidate.version_name, &e.to_string()),
        }
    }

    let keep: HashSet<PathBuf> = tasks.iter().map(|t| t.dest.clone()).collect();
    match evict(&paths.apps, &keep, ctx.config.cache.apps.policy()?, SystemTime::now()) {
        Ok(report) if report.freed > 0 => out.info(&format!(
            "Evicted {} cached artifacts",
            report.expired.len() + report.trimmed.len()
        )),
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Cache eviction failed: {e}");
            out.warning(&format!("Cache eviction failed: {e}"));
        }
    }

    out.section("Downloading...");
    let fetcher = catalogs.iter().fold(HttpFetcher::new(validators.clone()), |f, c| {
        f.with_client(c.address(), c.client().clone())
    });
    let report = run_downloads(
        tasks,
        ctx.config.parallel_downloads,
        Arc::new(fetcher),
        out.clone(),
    )
    .await;
    save_validators(ctx, &validators);
    summary.downloaded = report.completed.len();
    out.summary(summary.downloaded, summary.updates, "Downloaded");

    if summary.downloaded == 0 {
        return Ok(summary);
    }

    out.section("Installing...");
    let downloaded: HashMap<&str, &DownloadTask> = report
        .completed
        .iter()
        .map(|(task, _)| (task.package.as_str(), task))
        .collect();
    for update in &result.updates {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let Some(task) = downloaded.get(update.candidate.package.as_str()) else {
            continue;
        };
        match session.install(&task.dest) {
            Ok(()) => {
                summary.installed += 1;
                out.done(&task.label, &task.version, "installed", None);
            }
            Err(e) if e.is_transport() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Install of {} failed: {e}", task.package);
                out.failed(&task.label, &task.version, &e.to_string());
            }
        }
    }
    out.summary(summary.installed, summary.downloaded, "Installed");
    ctx.checkpoint()?;
    Ok(summary)
}

/// Repositories from the config, or discovered from the F-Droid client.
fn configured_repos<C: Connector>(
    ctx: &Context,
    session: &mut DeviceSession<C>,
) -> Result<Vec<RepoSpec>, UpdateError> {
    if !ctx.config.repos.is_empty() {
        return Ok(ctx.config.repos.clone());
    }

    let out = &ctx.output;
    out.section("Discovering repos...");
    if !ctx.paths.fdroid_db.is_file() {
        out.info("Confirm the backup of the F-Droid client on the device");
    }
    pull_database(session, &ctx.paths.fdroid_db)?;
    let repos = read_repositories(&ctx.paths.fdroid_db)?;
    if repos.is_empty() {
        return Err(UpdateError::NoRepos);
    }
    for repo in &repos {
        out.row(&repo.name, "", &repo.address);
    }
    if !ctx.dry_run {
        save_repos(&ctx.config_path, &repos)?;
        out.info(&format!("Saved to {}", ctx.config_path.display()));
    }
    Ok(repos)
}

fn enumerate<C: Connector>(
    ctx: &Context,
    session: &mut DeviceSession<C>,
) -> Result<DeviceSnapshot, UpdateError> {
    match &ctx.config.lister_jar {
        Some(jar) if !jar.is_file() => Err(UpdateError::MissingLister(jar.clone())),
        Some(jar) => Ok(session.enumerate_with_lister(jar)?),
        None => Ok(session.enumerate_with_dumpsys()?),
    }
}

fn save_validators(ctx: &Context, validators: &ValidatorStore) {
    if let Err(e) = validators.save() {
        tracing::warn!("Failed to save validators: {e}");
        ctx.output.warning(&format!("Failed to save cache info: {e}"));
    }
}

fn installed_version(app: &InstalledApp) -> String {
    app.version_name
        .clone()
        .unwrap_or_else(|| app.version_code.to_string())
}

fn missing_detail(app: &InstalledApp) -> String {
    let installer = app
        .installer
        .as_deref()
        .map_or("n/a", |pkg| installer_name(pkg).unwrap_or(pkg));
    format!("not in any repository ({installer})")
}
