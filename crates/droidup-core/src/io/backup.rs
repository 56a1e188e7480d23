//! Forward-only extraction from Android backup containers.
//!
//! A backup as produced by `bu backup` is a 24-byte ASCII header followed by
//! a compressed tar stream. The stream is never seekable (it comes straight
//! off the device), so members are located by scanning in order.

use super::inflate::{Framing, InflateSource, inflate};
use super::stream::ChunkStream;
use std::io::{self, Chain, Cursor, Read, Write};
use thiserror::Error;

/// Length of the container header.
pub const HEADER_LEN: usize = 24;

const MAGIC: &[u8] = b"ANDROID BACKUP\n";
const TRAILER: &[u8] = b"\n1\nnone\n";

/// Errors raised while opening or scanning a backup.
#[derive(Error, Debug)]
pub enum BackupError {
    /// The header is not an unencrypted, compressed Android backup header.
    #[error("Not an Android backup (header: {:?})", String::from_utf8_lossy(.found))]
    BadMagic {
        /// The bytes read in place of the header.
        found: Vec<u8>,
    },

    /// The archive ended without the requested member.
    #[error("Member not found in backup: {0}")]
    MemberNotFound(String),

    /// Reading or decompressing the payload failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Read and validate the container header.
///
/// Returns the backup format version digit.
///
/// # Errors
///
/// Returns [`BackupError::BadMagic`] with whatever was read if the header is
/// short or does not match `"ANDROID BACKUP\n<v>\n1\nnone\n"`.
pub fn read_header<R: Read>(reader: &mut R) -> Result<u8, BackupError> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    reader
        .by_ref()
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)?;

    let valid = header.len() == HEADER_LEN
        && header.starts_with(MAGIC)
        && header[MAGIC.len()].is_ascii_digit()
        && header.ends_with(TRAILER);
    if !valid {
        return Err(BackupError::BadMagic { found: header });
    }
    Ok(header[MAGIC.len()] - b'0')
}

type Payload<R> = ChunkStream<InflateSource<Chain<Cursor<Vec<u8>>, R>>>;

/// An opened backup, positioned at the start of its tar payload.
pub struct BackupArchive<R: Read> {
    archive: tar::Archive<Payload<R>>,
    version: u8,
}

impl<R: Read> BackupArchive<R> {
    /// Validate the header and set up decompression of the payload.
    ///
    /// The payload framing (zlib or raw deflate) is detected from its first
    /// two bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::BadMagic`] on a bad header, or an IO error.
    pub fn open(mut reader: R) -> Result<Self, BackupError> {
        let version = read_header(&mut reader)?;

        let mut head = Vec::with_capacity(2);
        reader.by_ref().take(2).read_to_end(&mut head)?;
        let framing = Framing::detect(&head);
        tracing::debug!("Backup v{version}, payload framing {framing:?}");

        let payload = inflate(Cursor::new(head).chain(reader), framing);
        Ok(Self {
            archive: tar::Archive::new(payload),
            version,
        })
    }

    /// Backup format version from the header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Scan forward to the first member whose path equals `path`.
    ///
    /// Members before it are skipped; those after it are never read. The
    /// archive can only be scanned once.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::MemberNotFound`] if the archive ends first.
    pub fn member(&mut self, path: &str) -> Result<tar::Entry<'_, Payload<R>>, BackupError> {
        for entry in self.archive.entries()? {
            let entry = entry?;
            if entry.path_bytes().as_ref() == path.as_bytes() {
                return Ok(entry);
            }
            tracing::trace!(
                "Skipping backup member {}",
                String::from_utf8_lossy(&entry.path_bytes())
            );
        }
        Err(BackupError::MemberNotFound(path.to_string()))
    }
}

impl<R: Read> std::fmt::Debug for BackupArchive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupArchive")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Copy one member of a backup stream into `out`.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// See [`BackupArchive::open`] and [`BackupArchive::member`].
pub fn extract_member<R: Read, W: Write>(
    reader: R,
    path: &str,
    out: &mut W,
) -> Result<u64, BackupError> {
    let mut archive = BackupArchive::open(reader)?;
    let mut entry = archive.member(path)?;
    Ok(io::copy(&mut entry, out)?)
}
