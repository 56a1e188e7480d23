//! Conditional HTTP fetches into the on-disk cache.
//!
//! Every cached file may have a validator (`ETag`) recorded against its
//! source URL. A refetch sends that validator together with the file's
//! modification time, and a `304 Not Modified` leaves the file untouched.
//! Bodies are streamed to a `.part` file and renamed into place once
//! complete, so an interrupted transfer never looks like a cached copy.

pub mod scheduler;

use futures::StreamExt;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors raised by a conditional fetch or the validator store.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The server answered neither success nor "not modified".
    #[error("HTTP {status} for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status.
        status: StatusCode,
    },

    /// The request or body transfer failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Writing the destination failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The body does not match the published digest.
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Published digest.
        expected: String,
        /// Digest of the received body.
        actual: String,
    },

    /// `cache.toml` does not parse.
    #[error("Invalid validator cache: {0}")]
    CacheInfo(#[from] toml::de::Error),

    /// The validator table could not be serialized.
    #[error("Failed to serialize validator cache: {0}")]
    CacheInfoSave(#[from] toml::ser::Error),

    /// The task died before reporting a result.
    #[error("Download aborted: {0}")]
    Aborted(String),
}

/// What a conditional fetch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A new body was stored.
    Downloaded {
        /// Body size in bytes.
        bytes: u64,
    },
    /// The server confirmed the cached copy.
    NotModified,
    /// The cached copy is at least as new as the freshness hint; no request was made.
    Fresh,
}

/// One conditional fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Source URL; also the validator key.
    pub url: &'a str,
    /// Destination file.
    pub dest: &'a Path,
    /// Publication time (seconds since the epoch). A cached copy modified at
    /// or after it is used without asking the server.
    pub server_ts: Option<i64>,
    /// Expected SHA-256 of the body, lowercase hex.
    pub sha256: Option<&'a str>,
}

impl<'a> FetchRequest<'a> {
    /// Fetch `url` into `dest`.
    pub fn new(url: &'a str, dest: &'a Path) -> Self {
        Self {
            url,
            dest,
            server_ts: None,
            sha256: None,
        }
    }

    /// Skip the request when the cached copy is newer than `ts`.
    #[must_use]
    pub fn fresh_after(mut self, ts: i64) -> Self {
        self.server_ts = Some(ts);
        self
    }

    /// Verify the body against a SHA-256 digest.
    #[must_use]
    pub fn verify(mut self, sha256: Option<&'a str>) -> Self {
        self.sha256 = sha256;
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheInfo {
    #[serde(default)]
    etags: BTreeMap<String, String>,
}

/// Validator tokens keyed by source URL, persisted as the `[etags]` table of
/// `cache.toml`.
#[derive(Debug, Default)]
pub struct ValidatorStore {
    path: Option<PathBuf>,
    etags: Mutex<BTreeMap<String, String>>,
}

impl ValidatorStore {
    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from `path`; a missing file gives an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, FetchError> {
        let info: CacheInfo = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheInfo::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Loaded {} validators from {}", info.etags.len(), path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            etags: Mutex::new(info.etags),
        })
    }

    /// Validator recorded for `url`.
    pub fn get(&self, url: &str) -> Option<String> {
        self.lock().get(url).cloned()
    }

    /// Record the validator for `url`.
    pub fn set(&self, url: &str, etag: &str) {
        self.lock().insert(url.to_string(), etag.to_string());
    }

    /// Number of recorded validators.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no validator is recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Write the store back to its file (atomic write).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self) -> Result<(), FetchError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let info = CacheInfo {
            etags: self.lock().clone(),
        };
        let content = toml::to_string_pretty(&info)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.etags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Format a timestamp as an HTTP date.
pub fn http_date(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Path of the in-progress download for `dest`.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Fetch `req.url` into `req.dest` unless the cached copy is still valid.
///
/// Validators are only sent when the destination exists, so a missing file
/// is always downloaded.
///
/// # Errors
///
/// Returns [`FetchError::Status`] for non-success responses (other than
/// 304), [`FetchError::HashMismatch`] when verification fails (the body is
/// discarded), or transport and IO errors.
pub async fn fetch_conditional(
    client: &Client,
    req: &FetchRequest<'_>,
    validators: &ValidatorStore,
) -> Result<FetchOutcome, FetchError> {
    let mtime = tokio::fs::metadata(req.dest)
        .await
        .ok()
        .and_then(|m| m.modified().ok());

    if let (Some(ts), Some(mtime)) = (req.server_ts, mtime) {
        let cached = mtime
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        if cached >= ts {
            tracing::debug!("{} is fresh", req.url);
            return Ok(FetchOutcome::Fresh);
        }
    }

    let mut request = client.get(req.url).header(USER_AGENT, crate::USER_AGENT);
    if let Some(mtime) = mtime {
        if let Some(etag) = validators.get(req.url) {
            request = request.header(IF_NONE_MATCH, etag);
        }
        request = request.header(IF_MODIFIED_SINCE, http_date(mtime));
    }

    let response = request.send().await?;
    let status = response.status();
    let etag = response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    if status == StatusCode::NOT_MODIFIED {
        tracing::debug!("{} not modified", req.url);
        if let Some(etag) = etag {
            validators.set(req.url, &etag);
        }
        return Ok(FetchOutcome::NotModified);
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            url: req.url.to_string(),
            status,
        });
    }

    let bytes = store_body(response, req.dest, req.sha256).await?;
    if let Some(etag) = etag {
        validators.set(req.url, &etag);
    }
    tracing::debug!("Fetched {} ({bytes} bytes)", req.url);
    Ok(FetchOutcome::Downloaded { bytes })
}

async fn store_body(
    response: reqwest::Response,
    dest: &Path,
    expected: Option<&str>,
) -> Result<u64, FetchError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = part_path(dest);
    let mut file = tokio::fs::File::create(&part).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if let Some(expected) = expected {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            tokio::fs::remove_file(&part).await.ok();
            return Err(FetchError::HashMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    tokio::fs::rename(&part, dest).await?;
    Ok(written)
}
