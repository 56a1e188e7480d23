//! Selection of the installed apps that take part in reconciliation.

use droidup_schema::InstalledApp;
use std::collections::HashSet;

/// Counters from one enumeration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InventoryStats {
    /// Every package reported.
    pub total: usize,
    /// Part of the system image.
    pub system: usize,
    /// Known but not installed for the user.
    pub removed: usize,
    /// Installed by a closed store.
    pub closed: usize,
    /// User apps from an open store or an unknown installer.
    pub foreign: usize,
    /// Listed in the ignore set.
    pub ignored: usize,
}

impl InventoryStats {
    /// Labelled counters in display order.
    pub fn rows(&self) -> [(&'static str, usize); 6] {
        [
            ("total", self.total),
            ("system", self.system),
            ("removed", self.removed),
            ("closed", self.closed),
            ("foreign", self.foreign),
            ("ignored", self.ignored),
        ]
    }
}

/// Keep the apps eligible for updates from open catalogs.
///
/// An app is eligible when it is not a system app, was installed by an open
/// store (or by an unknown installer), is still installed, and is not in
/// `ignore`.
pub fn select_updatable(
    apps: Vec<InstalledApp>,
    ignore: &HashSet<String>,
) -> (Vec<InstalledApp>, InventoryStats) {
    let mut stats = InventoryStats::default();
    let mut selected = Vec::new();

    for app in apps {
        let ignored = ignore.contains(app.package.as_str());
        stats.total += 1;
        stats.system += usize::from(app.system);
        stats.removed += usize::from(app.removed);
        stats.ignored += usize::from(ignored);

        if app.system || !app.is_from_open_store() {
            continue;
        }
        stats.foreign += 1;
        if ignored || app.removed {
            tracing::debug!("Skipping {} (ignored: {ignored}, removed: {})", app.package, app.removed);
            continue;
        }
        selected.push(app);
    }
    stats.closed = stats.total - stats.system - stats.foreign;

    (selected, stats)
}
