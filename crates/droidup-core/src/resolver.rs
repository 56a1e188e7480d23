use droidup_schema::{Candidate, DeviceProfile, InstalledApp, PackageCatalog};

/// A parsed catalog as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct CatalogRef<'a> {
    /// Catalog display name.
    pub name: &'a str,
    /// Catalog base address.
    pub address: &'a str,
    /// Normalized index.
    pub index: &'a dyn PackageCatalog,
}

/// The update chosen for one installed app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUpdate {
    /// The app as installed.
    pub installed: InstalledApp,
    /// The version to install.
    pub candidate: Candidate,
    /// Name of the catalog offering it.
    pub catalog_name: String,
    /// Address of that catalog; artifact locators are relative to it.
    pub catalog_address: String,
}

/// Outcome of reconciling installed apps against every catalog.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Available updates, ordered by (installer, label).
    pub updates: Vec<ResolvedUpdate>,
    /// Apps no catalog offers a compatible build of.
    pub missing: Vec<InstalledApp>,
    /// Apps whose best compatible build is already installed.
    pub up_to_date: usize,
}

/// Returns `true` if the device can run `candidate`: its SDK floor is met
/// and it either ships no native code or shares an ABI with the device.
pub fn is_device_compatible(device: &DeviceProfile, candidate: &Candidate) -> bool {
    device.sdk >= candidate.min_sdk
        && (candidate.abis.is_empty()
            || candidate
                .abis
                .iter()
                .any(|abi| device.supported_abis.contains(abi)))
}

/// Returns `true` if `candidate` can replace the installed app.
///
/// Android refuses updates signed by a different certificate, so signers
/// must match whenever both sides are known.
pub fn is_app_compatible(app: &InstalledApp, candidate: &Candidate) -> bool {
    match (&app.signer, &candidate.signer) {
        (Some(installed), Some(offered)) => installed.eq_ignore_ascii_case(offered),
        _ => true,
    }
}

/// The highest compatible version of `app` in one catalog.
///
/// Candidates are tried newest first; equal version codes keep the order
/// the catalog declares them in.
pub fn best_in_catalog(
    index: &dyn PackageCatalog,
    device: &DeviceProfile,
    app: &InstalledApp,
) -> Option<Candidate> {
    let mut candidates = index.candidates_for(app.package.as_str());
    candidates.sort_by(|a, b| b.version_code.cmp(&a.version_code));
    candidates
        .into_iter()
        .find(|c| is_device_compatible(device, c) && is_app_compatible(app, c))
}

/// Reconcile `apps` against `catalogs`, in priority order.
///
/// An update must be strictly newer than the installed version, and a later
/// catalog only wins with a strictly newer version. Apps without any
/// compatible build are reported as missing.
pub fn reconcile(
    device: &DeviceProfile,
    apps: &[InstalledApp],
    catalogs: &[CatalogRef<'_>],
) -> Reconciliation {
    let mut result = Reconciliation::default();

    for app in apps {
        let mut found = false;
        let mut best: Option<ResolvedUpdate> = None;

        for catalog in catalogs {
            let Some(candidate) = best_in_catalog(catalog.index, device, app) else {
                continue;
            };
            found = true;

            if !candidate.version_code.is_newer_than(app.version_code) {
                continue;
            }
            if best
                .as_ref()
                .is_some_and(|b| !candidate.version_code.is_newer_than(b.candidate.version_code))
            {
                continue;
            }
            tracing::debug!(
                "{}: {} -> {} from {}",
                app.package,
                app.version_code,
                candidate.version_code,
                catalog.name
            );
            best = Some(ResolvedUpdate {
                installed: app.clone(),
                candidate,
                catalog_name: catalog.name.to_string(),
                catalog_address: catalog.address.to_string(),
            });
        }

        match best {
            Some(update) => result.updates.push(update),
            None if found => result.up_to_date += 1,
            None => result.missing.push(app.clone()),
        }
    }

    result.updates.sort_by(|a, b| {
        installer_key(&a.installed)
            .cmp(installer_key(&b.installed))
            .then_with(|| a.candidate.label.cmp(&b.candidate.label))
    });
    result.missing.sort_by(|a, b| {
        installer_key(a)
            .cmp(installer_key(b))
            .then_with(|| a.label.cmp(&b.label))
    });

    tracing::info!(
        "{} updates, {} up to date, {} missing",
        result.updates.len(),
        result.up_to_date,
        result.missing.len()
    );
    result
}

fn installer_key(app: &InstalledApp) -> &str {
    app.installer.as_deref().unwrap_or("n/a")
}
