use dirs::home_dir;
use reqwest::Url;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A catalog address or locator that does not form a valid URL.
#[derive(Error, Debug)]
#[error("Invalid URL: {0}")]
pub struct InvalidUrl(pub String);

/// Returns the droidup home directory (`$DROIDUP_HOME`, else `~/.droidup`),
/// or None if the user's home cannot be resolved.
pub fn try_droidup_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("DROIDUP_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".droidup"))
}

/// On-disk layout under the droidup home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Home directory.
    pub root: PathBuf,
    /// User configuration: `<root>/config.toml`.
    pub config: PathBuf,
    /// Cache root: `<root>/cache`.
    pub cache: PathBuf,
    /// Catalog index mirror: `<cache>/index`.
    pub index: PathBuf,
    /// Downloaded artifacts: `<cache>/apps`.
    pub apps: PathBuf,
    /// Persisted HTTP validators: `<cache>/cache.toml`.
    pub cache_info: PathBuf,
    /// F-Droid client database pulled from the device backup.
    pub fdroid_db: PathBuf,
}

impl Paths {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let cache = root.join("cache");
        Self {
            config: root.join("config.toml"),
            index: cache.join("index"),
            apps: cache.join("apps"),
            cache_info: cache.join("cache.toml"),
            fdroid_db: cache.join("fdroid_db"),
            cache,
            root,
        }
    }

    /// Layout rooted at [`try_droidup_home`].
    pub fn discover() -> Option<Self> {
        try_droidup_home().map(Self::new)
    }

    /// Create the cache directories.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.index)?;
        std::fs::create_dir_all(&self.apps)
    }
}

/// Map a URL to a relative cache path: `host[:port]/path`.
///
/// Query and fragment are dropped.
///
/// # Errors
///
/// Returns [`InvalidUrl`] if `url` does not parse or has no host.
pub fn url_to_path(url: &str) -> Result<PathBuf, InvalidUrl> {
    let parsed = Url::parse(url).map_err(|_| InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| InvalidUrl(url.to_string()))?;

    let mut path = match parsed.port() {
        Some(port) => PathBuf::from(format!("{host}:{port}")),
        None => PathBuf::from(host),
    };
    for segment in parsed.path().split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    Ok(path)
}

/// Resolve a catalog locator against the catalog address.
///
/// Locators are always relative to the address, even when written with a
/// leading `/`.
///
/// # Errors
///
/// Returns [`InvalidUrl`] if the address is not a valid base URL.
pub fn join_locator(address: &str, locator: &str) -> Result<Url, InvalidUrl> {
    let base = if address.ends_with('/') {
        Url::parse(address)
    } else {
        Url::parse(&format!("{address}/"))
    }
    .map_err(|_| InvalidUrl(address.to_string()))?;

    base.join(locator.trim_start_matches('/'))
        .map_err(|_| InvalidUrl(format!("{address} + {locator}")))
}

/// Cache location of `url` under `root`.
///
/// # Errors
///
/// See [`url_to_path`].
pub fn cache_file(root: &Path, url: &str) -> Result<PathBuf, InvalidUrl> {
    Ok(root.join(url_to_path(url)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_to_path() {
        assert_eq!(
            url_to_path("https://f-droid.org/repo/index-v1.json").unwrap(),
            PathBuf::from("f-droid.org/repo/index-v1.json")
        );
        assert_eq!(
            url_to_path("http://localhost:8080/fdroid/repo/a.apk?x=1#frag").unwrap(),
            PathBuf::from("localhost:8080/fdroid/repo/a.apk")
        );
        assert!(url_to_path("not a url").is_err());
    }

    #[test]
    fn test_join_locator() {
        let url = join_locator("https://f-droid.org/repo/", "/org.example_3.apk").unwrap();
        assert_eq!(url.as_str(), "https://f-droid.org/repo/org.example_3.apk");

        let url = join_locator("https://f-droid.org/repo", "index-v1.json").unwrap();
        assert_eq!(url.as_str(), "https://f-droid.org/repo/index-v1.json");

        let url = join_locator("https://example.org/fdroid/repo/", "/index-v2.json").unwrap();
        assert_eq!(url.as_str(), "https://example.org/fdroid/repo/index-v2.json");
    }

    #[test]
    fn test_layout() {
        let paths = Paths::new("/tmp/droidup");
        assert_eq!(paths.config, PathBuf::from("/tmp/droidup/config.toml"));
        assert_eq!(paths.apps, PathBuf::from("/tmp/droidup/cache/apps"));
        assert_eq!(paths.cache_info, PathBuf::from("/tmp/droidup/cache/cache.toml"));
    }
}
