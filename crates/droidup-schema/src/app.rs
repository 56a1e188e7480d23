//! Installed applications and the device enumeration report.
//!
//! The on-device lister prints a single JSON document describing the build
//! properties of the device and every package the package manager knows,
//! including uninstalled-but-retained ones.

use crate::types::{PackageId, VersionCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Installer of the stock package installer UI (sideloaded apps).
pub const PKG_INSTALLER: &str = "com.google.android.packageinstaller";

/// Installers whose apps may be updated from open catalogs.
///
/// Apps installed by closed stores (Play Store, vendor stores) are left alone
/// since their signers rarely match catalog builds.
pub const OPEN_STORES: &[&str] = &[
    PKG_INSTALLER,
    crate::FDROID_APP,
    "nya.kitsunyan.foxydroid",
    "de.marmaro.krt.ffupdater",
];

const KNOWN_INSTALLERS: &[(&str, &str)] = &[
    (PKG_INSTALLER, "Package Installer"),
    (crate::FDROID_APP, "F-Droid"),
    ("nya.kitsunyan.foxydroid", "Foxy Droid"),
    ("de.marmaro.krt.ffupdater", "FFUpdater"),
    ("com.oasisfeng.island.fdroid", "Island Sandbox"),
    ("com.android.vending", "Play Store"),
    ("com.amazon.venezia", "Amazon Store"),
    ("com.huawei.appmarket", "Huawei Store"),
    ("com.aurora.store", "Aurora Store"),
];

/// Human readable name of a well-known installer package.
pub fn installer_name(pkg: &str) -> Option<&'static str> {
    KNOWN_INSTALLERS
        .iter()
        .find(|(id, _)| *id == pkg)
        .map(|(_, name)| *name)
}

/// A package as currently installed on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    /// Application id.
    pub package: PackageId,
    /// Display label from the package manager.
    pub label: String,
    /// Installed version code (0 when the package is not installed).
    pub version_code: VersionCode,
    /// Installed version name, if any.
    pub version_name: Option<String>,
    /// Part of the system image.
    pub system: bool,
    /// Known to the package manager but not installed for the user.
    pub removed: bool,
    /// Package that installed this app, if known.
    pub installer: Option<String>,
    /// SHA-256 of the signing certificate, if the enumeration reported it.
    pub signer: Option<String>,
}

impl InstalledApp {
    /// Returns `true` if the installer is unknown or one of [`OPEN_STORES`].
    pub fn is_from_open_store(&self) -> bool {
        self.installer
            .as_deref()
            .is_none_or(|inst| OPEN_STORES.contains(&inst))
    }
}

impl From<ListerApp> for InstalledApp {
    fn from(app: ListerApp) -> Self {
        Self {
            package: app.pkg,
            label: app.label,
            version_code: app.vcode.unwrap_or_default(),
            version_name: app.vname,
            system: app.system,
            removed: app.removed,
            installer: app.installer,
            signer: app.signer,
        }
    }
}

/// One entry of the `apps` object printed by the lister.
#[derive(Debug, Clone, Deserialize)]
pub struct ListerApp {
    /// Application id.
    pub pkg: PackageId,
    /// Display label.
    pub label: String,
    /// Version code; `null` for removed packages.
    pub vcode: Option<VersionCode>,
    /// Version name; `null` for removed packages.
    pub vname: Option<String>,
    /// System image flag.
    pub system: bool,
    /// Not installed for the current user.
    pub removed: bool,
    /// Installing package.
    pub installer: Option<String>,
    /// Signing certificate digest (newer lister builds only).
    #[serde(default)]
    pub signer: Option<String>,
}

/// `VERSION` block of the device build properties.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildVersion {
    /// `Build.VERSION.SDK_INT`.
    #[serde(rename = "SDK_INT")]
    pub sdk_int: u32,
    /// `Build.VERSION.MIN_SUPPORTED_TARGET_SDK_INT`.
    #[serde(rename = "MIN_SUPPORTED_TARGET_SDK_INT", default)]
    pub min_supported_target_sdk_int: u32,
}

/// `build` block of the device report.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    /// `Build.MODEL`.
    #[serde(rename = "MODEL")]
    pub model: String,
    /// `Build.SUPPORTED_ABIS`, most preferred first.
    #[serde(rename = "SUPPORTED_ABIS")]
    pub supported_abis: Vec<String>,
    /// SDK levels.
    #[serde(rename = "VERSION")]
    pub version: BuildVersion,
}

/// `device` block of the report.
#[derive(Debug, Clone, Deserialize)]
pub struct ListerDevice {
    /// Kernel architecture (`os.arch`).
    pub arch: String,
    /// Build properties.
    pub build: BuildInfo,
}

/// Complete document printed by the lister.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceReport {
    /// Device properties.
    pub device: ListerDevice,
    /// Every package, keyed by application id.
    pub apps: HashMap<String, ListerApp>,
}

/// The compatibility-relevant properties of the connected device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Marketing model name.
    pub model: String,
    /// Kernel architecture.
    pub arch: String,
    /// Supported native ABIs.
    pub supported_abis: Vec<String>,
    /// Platform SDK level.
    pub sdk: u32,
    /// Lowest target SDK the platform still runs.
    pub min_sdk: u32,
}

impl From<&ListerDevice> for DeviceProfile {
    fn from(dev: &ListerDevice) -> Self {
        Self {
            model: dev.build.model.clone(),
            arch: dev.arch.clone(),
            supported_abis: dev.build.supported_abis.clone(),
            sdk: dev.build.version.sdk_int,
            min_sdk: dev.build.version.min_supported_target_sdk_int,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "device": {
            "arch": "aarch64",
            "build": {
                "MODEL": "Pixel 7",
                "SUPPORTED_ABIS": ["arm64-v8a", "armeabi-v7a"],
                "VERSION": {"SDK_INT": 34, "MIN_SUPPORTED_TARGET_SDK_INT": 23}
            }
        },
        "apps": {
            "org.fdroid.fdroid": {
                "uid": 10123, "pkg": "org.fdroid.fdroid", "removed": false,
                "system": false, "label": "F-Droid", "vcode": 1019050,
                "vname": "1.19.0", "installer": null
            },
            "com.old.app": {
                "uid": 10124, "pkg": "com.old.app", "removed": true,
                "system": false, "label": "Old", "vcode": null,
                "vname": null, "installer": "com.android.vending"
            }
        }
    }"#;

    #[test]
    fn test_parse_lister_report() {
        let report: DeviceReport = serde_json::from_str(REPORT).unwrap();
        let profile = DeviceProfile::from(&report.device);
        assert_eq!(profile.sdk, 34);
        assert_eq!(profile.min_sdk, 23);
        assert_eq!(profile.supported_abis, vec!["arm64-v8a", "armeabi-v7a"]);

        let fdroid = InstalledApp::from(report.apps["org.fdroid.fdroid"].clone());
        assert_eq!(fdroid.version_code, VersionCode(1_019_050));
        assert!(fdroid.is_from_open_store());

        let old = InstalledApp::from(report.apps["com.old.app"].clone());
        assert_eq!(old.version_code, VersionCode(0));
        assert!(old.removed);
        assert!(!old.is_from_open_store());
    }

    #[test]
    fn test_installer_name() {
        assert_eq!(installer_name("com.android.vending"), Some("Play Store"));
        assert_eq!(installer_name("com.example"), None);
    }
}
