//! Repository discovery from the F-Droid client's database.
//!
//! The client keeps its repositories in the `CoreRepository` table of
//! `fdroid_db`, which is only reachable through a device backup.

use super::{CatalogError, RepoSpec};
use crate::device::{Connector, DeviceError, DeviceSession};
use crate::download::part_path;
use droidup_schema::FDROID_APP;
use droidup_schema::index::LOCALE;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;

/// Path of the database inside the client's backup.
pub const FDROID_DB_MEMBER: &str = "apps/org.fdroid.fdroid/db/fdroid_db";

/// Back up the F-Droid client and store its database at `dest`.
///
/// Does nothing if `dest` already exists.
///
/// # Errors
///
/// Returns transport errors, or [`DeviceError::Backup`] if the backup does
/// not hold the database.
pub fn pull_database<C: Connector>(
    session: &mut DeviceSession<C>,
    dest: &Path,
) -> Result<(), DeviceError> {
    if dest.is_file() {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let part = part_path(dest);
    let mut out = std::fs::File::create(&part)?;
    let written = match session.pull_backup_member(FDROID_APP, FDROID_DB_MEMBER, &mut out) {
        Ok(n) => n,
        Err(e) => {
            drop(out);
            std::fs::remove_file(&part).ok();
            return Err(e);
        }
    };
    drop(out);
    std::fs::rename(&part, dest)?;
    tracing::info!("Pulled {FDROID_DB_MEMBER} ({written} bytes)");
    Ok(())
}

/// Read the configured repositories from a pulled `fdroid_db`.
///
/// # Errors
///
/// Returns [`CatalogError::Database`] if the file is not a client database.
pub fn read_repositories(db: &Path) -> Result<Vec<RepoSpec>, CatalogError> {
    let conn = Connection::open_with_flags(db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare("SELECT name, address FROM CoreRepository")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .map(|(name, address)| RepoSpec {
            name: localized_name(&name),
            address: if address.ends_with('/') {
                address
            } else {
                format!("{address}/")
            },
        })
        .collect())
}

/// Names are stored as a JSON map of locale to text.
fn localized_name(raw: &str) -> String {
    let Ok(names) = serde_json::from_str::<HashMap<String, String>>(raw) else {
        return raw.to_string();
    };
    names
        .get(LOCALE)
        .or_else(|| names.values().next())
        .cloned()
        .unwrap_or_else(|| raw.to_string())
}
