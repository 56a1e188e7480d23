//! Streaming decompression stages.
//!
//! A stage pulls [`CHUNK_SIZE`] blocks from any [`Read`] upstream, runs them
//! through an inflate context and hands out the decompressed bytes as a new
//! [`ChunkStream`]. Because the result implements `Read` itself, stages chain.

use super::stream::{CHUNK_SIZE, ChunkSource, ChunkStream};
use flate2::bufread::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use std::io::{self, BufReader, Read};

/// Compressed stream framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Raw deflate, no header or trailer.
    Deflate,
    /// Deflate wrapped in a zlib header and adler32 trailer.
    Zlib,
    /// One or more concatenated gzip members.
    Gzip,
}

impl Framing {
    /// Guess the framing from the first bytes of a compressed stream.
    ///
    /// Anything that is neither a gzip magic nor a valid zlib header is
    /// treated as raw deflate.
    pub fn detect(head: &[u8]) -> Self {
        match head {
            [0x1f, 0x8b, ..] => Self::Gzip,
            [cmf, flg, ..]
                if cmf & 0x0f == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0 =>
            {
                Self::Zlib
            }
            _ => Self::Deflate,
        }
    }
}

enum Decoder<R: Read> {
    Deflate(DeflateDecoder<BufReader<R>>),
    Zlib(ZlibDecoder<BufReader<R>>),
    Gzip(MultiGzDecoder<BufReader<R>>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Deflate(d) => d.read(buf),
            Self::Zlib(d) => d.read(buf),
            Self::Gzip(d) => d.read(buf),
        }
    }
}

/// Chunk source producing decompressed blocks from a compressed upstream.
pub struct InflateSource<R: Read> {
    decoder: Decoder<R>,
    framing: Framing,
}

impl<R: Read> std::fmt::Debug for InflateSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflateSource")
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl<R: Read> InflateSource<R> {
    /// Wrap `upstream`, reading it in [`CHUNK_SIZE`] blocks.
    pub fn new(upstream: R, framing: Framing) -> Self {
        let reader = BufReader::with_capacity(CHUNK_SIZE, upstream);
        let decoder = match framing {
            Framing::Deflate => Decoder::Deflate(DeflateDecoder::new(reader)),
            Framing::Zlib => Decoder::Zlib(ZlibDecoder::new(reader)),
            Framing::Gzip => Decoder::Gzip(MultiGzDecoder::new(reader)),
        };
        Self { decoder, framing }
    }
}

impl<R: Read> ChunkSource for InflateSource<R> {
    type Chunk = Vec<u8>;

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut out = vec![0u8; CHUNK_SIZE];
        loop {
            match self.decoder.read(&mut out) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    out.truncate(n);
                    return Ok(Some(out));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    // The upstream drains itself when dropped; decompressing the rest is wasted work.
    fn drain(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Build a decompression stage over `upstream`.
pub fn inflate<R: Read>(upstream: R, framing: Framing) -> ChunkStream<InflateSource<R>> {
    ChunkStream::new(InflateSource::new(upstream, framing))
}
