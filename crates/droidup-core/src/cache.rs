//! Age and size bounded pruning of the artifact cache.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;

const DAY: u64 = 24 * 60 * 60;
const SIZE_UNITS: &str = "KMGTPEZYRQ";

/// Errors raised while pruning the cache.
#[derive(Error, Debug)]
pub enum EvictionError {
    /// A size limit that [`parse_size`] cannot read.
    #[error("Invalid size: {0:?}")]
    InvalidSize(String),

    /// Cache metadata could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Limits applied to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Files this many whole days old (or older) are removed.
    pub max_days: u64,
    /// Total size budget in bytes.
    pub max_size: u64,
}

/// What an eviction pass removed.
#[derive(Debug, Default)]
pub struct EvictionReport {
    /// Files removed for age.
    pub expired: Vec<PathBuf>,
    /// Files removed to meet the size budget, oldest first.
    pub trimmed: Vec<PathBuf>,
    /// Bytes freed.
    pub freed: u64,
    /// Bytes left in the cache, excluding kept files.
    pub remaining: u64,
}

/// Parse a human size such as `1G`, `512M`, `1.5GB` or `1024`.
///
/// Units are 1024-based. A trailing `B` is optional.
///
/// # Errors
///
/// Returns [`EvictionError::InvalidSize`] for anything else.
pub fn parse_size(text: &str) -> Result<u64, EvictionError> {
    let invalid = || EvictionError::InvalidSize(text.to_string());
    let upper = text.trim().to_ascii_uppercase();
    let mut body = upper.strip_suffix('B').unwrap_or(&upper);

    let mut multiplier = 1f64;
    if let Some(last) = body.chars().last()
        && let Some(exp) = SIZE_UNITS.find(last)
    {
        multiplier = 1024f64.powi(i32::try_from(exp).map_err(|_| invalid())? + 1);
        body = &body[..body.len() - 1];
    }

    let number: f64 = body.trim().parse().map_err(|_| invalid())?;
    if !number.is_finite() || number < 0.0 {
        return Err(invalid());
    }
    let bytes = number * multiplier;
    if bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(bytes as u64)
}

struct CachedFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Prune `root` according to `policy`. Paths in `keep` are never touched
/// and do not count against the budget.
///
/// Files at least `max_days` whole days old are removed first (23 hours
/// counts as 0 days). If the rest still exceeds `max_size`, files are
/// removed oldest first until the total is at or under it. A single file
/// larger than `max_size` is left in place and the sweep moves on to the
/// next-oldest file, so the total may stay over budget.
///
/// Individual removal failures are logged and skipped.
///
/// # Errors
///
/// Returns an error only if a file's metadata cannot be read.
pub fn evict(
    root: &Path,
    keep: &HashSet<PathBuf>,
    policy: EvictionPolicy,
    now: SystemTime,
) -> Result<EvictionReport, EvictionError> {
    let mut report = EvictionReport::default();
    if !root.is_dir() {
        return Ok(report);
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if keep.contains(entry.path()) {
            continue;
        }
        let meta = entry.metadata().map_err(std::io::Error::from)?;
        let modified = meta.modified()?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        let file = CachedFile {
            path: entry.into_path(),
            size: meta.len(),
            modified,
        };

        if age.as_secs() / DAY >= policy.max_days {
            if remove(&file.path) {
                report.freed += file.size;
                report.expired.push(file.path);
            }
            continue;
        }
        report.remaining += file.size;
        files.push(file);
    }

    if report.remaining > policy.max_size {
        files.sort_by_key(|f| f.modified);
        for file in files {
            if report.remaining <= policy.max_size {
                break;
            }
            if file.size > policy.max_size {
                tracing::debug!(
                    "Keeping {}: {} bytes exceeds the {} byte budget",
                    file.path.display(),
                    file.size,
                    policy.max_size
                );
                continue;
            }
            if remove(&file.path) {
                report.remaining -= file.size;
                report.freed += file.size;
                report.trimmed.push(file.path);
            }
        }
    }

    tracing::info!(
        "Cache eviction: {} expired, {} trimmed, {} bytes freed, {} bytes remaining",
        report.expired.len(),
        report.trimmed.len(),
        report.freed,
        report.remaining
    );
    Ok(report)
}

fn remove(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Evicted {}", path.display());
            true
        }
        Err(e) => {
            tracing::warn!("Failed to evict {}: {e}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOUR: u64 = 60 * 60;

    fn cached(dir: &Path, name: &str, size: usize, age_hours: u64, now: SystemTime) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; size]).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(now - Duration::from_secs(age_hours * HOUR))
            .unwrap();
        path
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
        assert_eq!(parse_size("1GB").unwrap(), 1 << 30);
        assert_eq!(parse_size("512m").unwrap(), 512 << 20);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert_eq!(parse_size("2048").unwrap(), 2048);
        assert_eq!(parse_size("10B").unwrap(), 10);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
        assert!(parse_size("-1M").is_err());
    }

    #[test]
    fn test_age_counts_whole_days() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let fresh = cached(dir.path(), "host/fresh.apk", 10, 23, now);
        let stale = cached(dir.path(), "host/stale.apk", 10, 25, now);

        let policy = EvictionPolicy {
            max_days: 1,
            max_size: u64::MAX,
        };
        let report = evict(dir.path(), &HashSet::new(), policy, now).unwrap();

        assert_eq!(report.expired, vec![stale.clone()]);
        assert!(fresh.exists());
        assert!(!stale.exists());
        assert_eq!(report.remaining, 10);
    }

    #[test]
    fn test_oldest_removed_until_within_budget() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let oldest = cached(dir.path(), "a/1.apk", 100, 72, now);
        let middle = cached(dir.path(), "b/2.apk", 100, 48, now);
        let newest = cached(dir.path(), "a/3.apk", 100, 24, now);

        let policy = EvictionPolicy {
            max_days: 30,
            max_size: 150,
        };
        let report = evict(dir.path(), &HashSet::new(), policy, now).unwrap();

        assert_eq!(report.trimmed, vec![oldest.clone(), middle.clone()]);
        assert_eq!(report.remaining, 100);
        assert!(!oldest.exists());
        assert!(!middle.exists());
        assert!(newest.exists());
    }

    #[test]
    fn test_file_larger_than_budget_is_skipped() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let huge = cached(dir.path(), "a/huge.apk", 200, 72, now);
        let older = cached(dir.path(), "a/older.apk", 100, 48, now);
        let newer = cached(dir.path(), "b/newer.apk", 100, 24, now);

        let policy = EvictionPolicy {
            max_days: 30,
            max_size: 150,
        };
        let report = evict(dir.path(), &HashSet::new(), policy, now).unwrap();

        assert!(huge.exists());
        assert_eq!(report.trimmed, vec![older.clone(), newer.clone()]);
        assert!(!older.exists());
        assert!(!newer.exists());
        assert_eq!(report.remaining, 200);
        assert_eq!(report.freed, 200);
    }

    #[test]
    fn test_exact_budget_is_kept() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        cached(dir.path(), "a.apk", 100, 2, now);
        cached(dir.path(), "b.apk", 100, 1, now);

        let policy = EvictionPolicy {
            max_days: 30,
            max_size: 200,
        };
        let report = evict(dir.path(), &HashSet::new(), policy, now).unwrap();
        assert!(report.trimmed.is_empty());
        assert_eq!(report.remaining, 200);
    }

    #[test]
    fn test_in_flight_targets_are_excluded() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let target = cached(dir.path(), "repo/target.apk", 500, 24 * 40, now);
        let other = cached(dir.path(), "repo/other.apk", 100, 10, now);

        let keep = HashSet::from([target.clone()]);
        let policy = EvictionPolicy {
            max_days: 30,
            max_size: 100,
        };
        let report = evict(dir.path(), &keep, policy, now).unwrap();

        assert!(target.exists());
        assert!(other.exists());
        assert!(report.expired.is_empty());
        assert!(report.trimmed.is_empty());
    }

    #[test]
    fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let policy = EvictionPolicy {
            max_days: 1,
            max_size: 0,
        };
        let report = evict(&dir.path().join("absent"), &HashSet::new(), policy, SystemTime::now()).unwrap();
        assert_eq!(report.freed, 0);
    }
}
