//! IO modules - streams, decompression and archive extraction

pub mod backup;
pub mod inflate;
pub mod stream;

pub use backup::{BackupArchive, BackupError, extract_member};
pub use inflate::{Framing, InflateSource, inflate};
pub use stream::{CHUNK_SIZE, ChunkSource, ChunkStream, IterSource, ReadSource, Utf8Source};
