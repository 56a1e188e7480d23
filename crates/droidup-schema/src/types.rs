use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// An Android application id (e.g. `org.fdroid.fdroid`).
///
/// Unlike display labels, ids are case-sensitive and kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Wrap a raw application id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<&str> for PackageId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Android `versionCode`: the totally ordered integer behind every version.
///
/// "Newer" always means strictly greater; display strings never take part
/// in ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionCode(pub u64);

impl VersionCode {
    /// Returns `true` if `self` is strictly newer than `other`.
    pub fn is_newer_than(self, other: VersionCode) -> bool {
        self.0 > other.0
    }
}

impl std::fmt::Display for VersionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VersionCode {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_code_ordering() {
        assert!(VersionCode(105).is_newer_than(VersionCode(100)));
        assert!(!VersionCode(100).is_newer_than(VersionCode(100)));
        assert!(VersionCode(9) < VersionCode(10));
    }

    #[test]
    fn test_package_id_is_case_sensitive() {
        assert_ne!(PackageId::new("org.Foo"), PackageId::new("org.foo"));
        assert_eq!(PackageId::new("org.foo"), "org.foo");
    }

    #[test]
    fn test_package_id_serde_transparent() {
        let id: PackageId = serde_json::from_str("\"org.fdroid.fdroid\"").unwrap();
        assert_eq!(id.as_str(), "org.fdroid.fdroid");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"org.fdroid.fdroid\"");
    }
}
