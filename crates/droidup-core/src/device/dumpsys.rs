//! Parser for `dumpsys package packages` output.
//!
//! Used when no lister jar is available. The text carries no labels or
//! signers, so labels fall back to the package id.

use droidup_schema::{InstalledApp, PackageId, VersionCode};
use regex::Regex;
use std::io;
use std::sync::OnceLock;

/// Command whose output [`parse_packages`] understands.
pub const COMMAND: &str = "dumpsys package packages";

fn attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s+([A-Za-z]+)=(.*)$").expect("valid regex"))
}

fn pkg_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^ ]+\{[^ ]+ ([^ }]+)\}").expect("valid regex"))
}

fn user_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s+User 0:.*\binstalled=(true|false)").expect("valid regex"))
}

#[derive(Default)]
struct Record {
    package: String,
    version_code: u64,
    version_name: Option<String>,
    system: bool,
    removed: bool,
    installer: Option<String>,
}

impl From<Record> for InstalledApp {
    fn from(r: Record) -> Self {
        Self {
            label: r.package.clone(),
            package: PackageId::new(r.package),
            version_code: VersionCode(r.version_code),
            version_name: r.version_name,
            system: r.system,
            removed: r.removed,
            installer: r.installer,
            signer: None,
        }
    }
}

/// Parse package records from the lines of `dumpsys package packages`.
///
/// A record starts at each `pkg=` attribute; `pkg=null` records are
/// skipped. Parsing stops at the hidden system packages section so updated
/// system apps are reported once.
///
/// # Errors
///
/// Propagates read errors from `lines`.
pub fn parse_packages<I>(lines: I) -> io::Result<Vec<InstalledApp>>
where
    I: IntoIterator<Item = io::Result<String>>,
{
    let mut apps = Vec::new();
    let mut current: Option<Record> = None;

    for line in lines {
        let line = line?;
        if line.starts_with("Hidden system packages:") {
            break;
        }

        if let Some(caps) = user_pattern().captures(&line) {
            if let Some(rec) = current.as_mut() {
                rec.removed = &caps[1] == "false";
            }
            continue;
        }

        let Some(caps) = attr_pattern().captures(&line) else {
            continue;
        };
        let (key, value) = (&caps[1], caps[2].trim());

        if key == "pkg" {
            apps.extend(current.take().map(InstalledApp::from));
            current = pkg_pattern().captures(value).map(|m| Record {
                package: m[1].to_string(),
                ..Record::default()
            });
            continue;
        }

        let Some(rec) = current.as_mut() else {
            continue;
        };
        match key {
            "versionCode" => {
                rec.version_code = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
            }
            "versionName" => rec.version_name = Some(value.to_string()),
            "flags" | "pkgFlags" => rec.system = value.split_whitespace().any(|f| f == "SYSTEM"),
            "installerPackageName" => {
                rec.installer = (value != "null").then(|| value.to_string());
            }
            _ => {}
        }
    }
    apps.extend(current.map(InstalledApp::from));

    tracing::debug!("Parsed {} packages from dumpsys", apps.len());
    Ok(apps)
}

/// Parse `ro.product.cpu.abilist` (comma separated).
pub fn parse_abi_list(value: &str) -> Vec<String> {
    value
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
Packages:
  Package [org.fdroid.fdroid] (5c1d2e3):
    userId=10123
    pkg=Package{7a8b9c org.fdroid.fdroid}
    codePath=/data/app/org.fdroid.fdroid-1
    versionCode=1019050 minSdk=23 targetSdk=25
    versionName=1.19.0
    flags=[ HAS_CODE ALLOW_CLEAR_USER_DATA ]
    installerPackageName=null
    User 0: ceDataInode=1234 installed=true hidden=false suspended=false
  Package [com.android.chrome] (1f2e3d):
    userId=10050
    pkg=Package{4d5e6f com.android.chrome}
    versionCode=600000000 minSdk=29 targetSdk=34
    versionName=120.0
    flags=[ SYSTEM HAS_CODE ]
    installerPackageName=com.android.vending
    User 0: ceDataInode=0 installed=false hidden=false
  Package [broken] (000):
    pkg=null

Hidden system packages:
  Package [com.android.chrome] (9a9a9a):
    pkg=Package{1b1b1b com.android.chrome}
    versionCode=500000000 minSdk=29 targetSdk=34
";

    fn parse(text: &str) -> Vec<InstalledApp> {
        parse_packages(text.lines().map(|l| Ok(l.to_string()))).unwrap()
    }

    #[test]
    fn test_parse_records() {
        let apps = parse(DUMP);
        assert_eq!(apps.len(), 2);

        let fdroid = &apps[0];
        assert_eq!(fdroid.package, "org.fdroid.fdroid");
        assert_eq!(fdroid.label, "org.fdroid.fdroid");
        assert_eq!(fdroid.version_code, VersionCode(1_019_050));
        assert_eq!(fdroid.version_name.as_deref(), Some("1.19.0"));
        assert!(!fdroid.system);
        assert!(!fdroid.removed);
        assert_eq!(fdroid.installer, None);

        let chrome = &apps[1];
        assert_eq!(chrome.version_code, VersionCode(600_000_000));
        assert!(chrome.system);
        assert!(chrome.removed);
        assert_eq!(chrome.installer.as_deref(), Some("com.android.vending"));
    }

    #[test]
    fn test_parse_abi_list() {
        assert_eq!(
            parse_abi_list("arm64-v8a,armeabi-v7a,armeabi\n"),
            vec!["arm64-v8a", "armeabi-v7a", "armeabi"]
        );
        assert!(parse_abi_list("\n").is_empty());
    }
}
