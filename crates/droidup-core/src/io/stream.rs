//! Pull-based buffered streams over opaque chunk sources.
//!
//! Device command output and HTTP bodies arrive as chunks of arbitrary size.
//! [`ChunkStream`] hides those boundaries: callers read as many units as they
//! want and whatever a chunk had left over stays buffered for the next call.
//!
//! The same adapter serves two flavors, selected by the chunk type:
//!
//! - `Vec<u8>` chunks give a byte stream that implements [`std::io::Read`].
//! - `String` chunks give a text stream counting characters, with
//!   [`ChunkStream::read_line`].

use std::io::{self, Read};

/// Block size used when pulling from readers.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// A buffer of logical units (bytes or characters).
///
/// Offsets are always byte offsets into the buffer; only [`Units::advance`]
/// knows how many bytes make up a unit.
pub trait Units: Default {
    /// Length of the buffer in bytes.
    fn byte_len(&self) -> usize;

    /// Walk at most `n` units starting at byte offset `from`.
    ///
    /// Returns the byte offset reached and the number of units walked.
    fn advance(&self, from: usize, n: usize) -> (usize, usize);

    /// Byte offset just past the first `\n` at or after `from`.
    fn line_end(&self, from: usize) -> Option<usize>;

    /// Copy out the byte range `from..to`.
    fn copy_range(&self, from: usize, to: usize) -> Self;

    /// Drop the first `upto` bytes.
    fn discard_front(&mut self, upto: usize);

    /// Append another chunk.
    fn push_units(&mut self, chunk: Self);

    /// Drop everything.
    fn reset(&mut self);
}

impl Units for Vec<u8> {
    fn byte_len(&self) -> usize {
        self.len()
    }

    fn advance(&self, from: usize, n: usize) -> (usize, usize) {
        let end = from.saturating_add(n).min(self.len());
        (end, end - from)
    }

    fn line_end(&self, from: usize) -> Option<usize> {
        self[from..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| from + i + 1)
    }

    fn copy_range(&self, from: usize, to: usize) -> Self {
        self[from..to].to_vec()
    }

    fn discard_front(&mut self, upto: usize) {
        self.drain(..upto);
    }

    fn push_units(&mut self, chunk: Self) {
        if self.is_empty() {
            *self = chunk;
        } else {
            self.extend_from_slice(&chunk);
        }
    }

    fn reset(&mut self) {
        self.clear();
    }
}

impl Units for String {
    fn byte_len(&self) -> usize {
        self.len()
    }

    fn advance(&self, from: usize, n: usize) -> (usize, usize) {
        let mut end = from;
        let mut count = 0;
        for c in self[from..].chars() {
            if count == n {
                break;
            }
            end += c.len_utf8();
            count += 1;
        }
        (end, count)
    }

    fn line_end(&self, from: usize) -> Option<usize> {
        self[from..].find('\n').map(|i| from + i + 1)
    }

    fn copy_range(&self, from: usize, to: usize) -> Self {
        self[from..to].to_string()
    }

    fn discard_front(&mut self, upto: usize) {
        self.drain(..upto);
    }

    fn push_units(&mut self, chunk: Self) {
        if self.is_empty() {
            *self = chunk;
        } else {
            self.push_str(&chunk);
        }
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// A producer of chunks, pulled one at a time.
///
/// `Ok(None)` marks the end of the source. Empty chunks are allowed and are
/// simply skipped by the stream.
pub trait ChunkSource {
    /// Unit buffer type produced by this source.
    type Chunk: Units;

    /// Pull the next chunk.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the underlying producer.
    fn next_chunk(&mut self) -> io::Result<Option<Self::Chunk>>;

    /// Consume and discard everything left in the source.
    ///
    /// Sources backed by a live device session must be read to the end, or
    /// the next command on that session would see stale output.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading the remainder.
    fn drain(&mut self) -> io::Result<()> {
        while self.next_chunk()?.is_some() {}
        Ok(())
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    type Chunk = S::Chunk;

    fn next_chunk(&mut self) -> io::Result<Option<Self::Chunk>> {
        (**self).next_chunk()
    }

    fn drain(&mut self) -> io::Result<()> {
        (**self).drain()
    }
}

/// Adapts any iterator of chunks into a [`ChunkSource`].
#[derive(Debug)]
pub struct IterSource<I>(pub I);

impl<I, C> ChunkSource for IterSource<I>
where
    I: Iterator<Item = C>,
    C: Units,
{
    type Chunk = C;

    fn next_chunk(&mut self) -> io::Result<Option<C>> {
        Ok(self.0.next())
    }
}

/// Chunks a blocking reader into fixed-size byte blocks.
#[derive(Debug)]
pub struct ReadSource<R> {
    reader: R,
    chunk_size: usize,
}

impl<R: Read> ReadSource<R> {
    /// Wrap `reader`, pulling [`CHUNK_SIZE`] bytes at a time.
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, CHUNK_SIZE)
    }

    /// Wrap `reader` with a custom block size.
    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Access the wrapped reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

impl<R: Read> ChunkSource for ReadSource<R> {
    type Chunk = Vec<u8>;

    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decodes a byte source into text chunks.
///
/// A multi-byte character split across two byte chunks is held back until
/// its tail arrives. Invalid sequences are replaced, never fatal.
#[derive(Debug)]
pub struct Utf8Source<S> {
    inner: S,
    pending: Vec<u8>,
}

impl<S> Utf8Source<S> {
    /// Wrap a byte source.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }
}

impl<S: ChunkSource<Chunk = Vec<u8>>> ChunkSource for Utf8Source<S> {
    type Chunk = String;

    fn next_chunk(&mut self) -> io::Result<Option<String>> {
        match self.inner.next_chunk()? {
            Some(bytes) => {
                self.pending.extend_from_slice(&bytes);
                let split = match std::str::from_utf8(&self.pending) {
                    Ok(_) => self.pending.len(),
                    // Incomplete sequence at the end: wait for the rest.
                    Err(e) if e.error_len().is_none() => e.valid_up_to(),
                    Err(_) => self.pending.len(),
                };
                let tail = self.pending.split_off(split);
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending = tail;
                Ok(Some(text))
            }
            None if !self.pending.is_empty() => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn drain(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.inner.drain()
    }
}

/// Buffered pull stream over a [`ChunkSource`].
///
/// Reads never block past the end of the source and never fail because the
/// source is exhausted: they return whatever is still buffered, then empty
/// buffers. Dropping or [closing](Self::close) the stream drains the source.
#[derive(Debug)]
pub struct ChunkStream<S: ChunkSource> {
    source: S,
    buf: S::Chunk,
    pos: usize,
    exhausted: bool,
    closed: bool,
}

impl<S: ChunkSource> ChunkStream<S> {
    /// Wrap a chunk source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            buf: S::Chunk::default(),
            pos: 0,
            exhausted: false,
            closed: false,
        }
    }

    /// Read up to `max` units, pulling from the source as needed.
    ///
    /// Returns fewer than `max` units only once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns errors raised by the source itself.
    pub fn read_units(&mut self, max: usize) -> io::Result<S::Chunk> {
        // Bytes past `pos` already walked; compaction keeps them in place
        // relative to `pos`, so each unit is counted once.
        let mut scanned = 0;
        let mut count = 0;
        loop {
            let (end, walked) = self.buf.advance(self.pos + scanned, max - count);
            count += walked;
            scanned = end - self.pos;
            if count == max || !self.pull()? {
                let end = self.pos + scanned;
                let out = self.buf.copy_range(self.pos, end);
                self.pos = end;
                return Ok(out);
            }
        }
    }

    /// Read everything that is left.
    ///
    /// # Errors
    ///
    /// Returns errors raised by the source itself.
    pub fn read_all(&mut self) -> io::Result<S::Chunk> {
        self.read_units(usize::MAX)
    }

    /// Returns `true` once the source ended and the buffer is empty.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.pos == self.buf.byte_len()
    }

    /// Drain the source and release it.
    ///
    /// # Errors
    ///
    /// Returns errors raised while draining.
    pub fn close(mut self) -> io::Result<()> {
        self.drain_source()
    }

    /// Pull one chunk into the buffer. Returns `false` at end of source.
    fn pull(&mut self) -> io::Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        match self.source.next_chunk()? {
            Some(chunk) => {
                self.compact();
                self.buf.push_units(chunk);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn compact(&mut self) {
        if self.pos == self.buf.byte_len() {
            self.buf.reset();
            self.pos = 0;
        } else if self.pos >= CHUNK_SIZE {
            self.buf.discard_front(self.pos);
            self.pos = 0;
        }
    }

    fn drain_source(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buf.reset();
        self.pos = 0;
        if !self.exhausted {
            self.exhausted = true;
            self.source.drain()?;
        }
        Ok(())
    }
}

impl<S: ChunkSource<Chunk = String>> ChunkStream<S> {
    /// Read exactly one line, including its trailing `\n`.
    ///
    /// The last line of a source may lack the newline. An empty string means
    /// the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns errors raised by the source itself.
    pub fn read_line(&mut self) -> io::Result<String> {
        let mut scanned = 0;
        loop {
            if let Some(end) = self.buf.line_end(self.pos + scanned) {
                let line = self.buf[self.pos..end].to_string();
                self.pos = end;
                return Ok(line);
            }
            scanned = self.buf.len() - self.pos;
            if !self.pull()? {
                let rest = self.buf[self.pos..].to_string();
                self.pos = self.buf.len();
                return Ok(rest);
            }
        }
    }

    /// Iterate over the remaining lines, without their line terminators.
    pub fn lines(&mut self) -> Lines<'_, S> {
        Lines { stream: self }
    }
}

/// Iterator returned by [`ChunkStream::lines`].
#[derive(Debug)]
pub struct Lines<'a, S: ChunkSource<Chunk = String>> {
    stream: &'a mut ChunkStream<S>,
}

impl<S: ChunkSource<Chunk = String>> Iterator for Lines<'_, S> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stream.read_line() {
            Ok(line) if line.is_empty() => None,
            Ok(mut line) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Some(Ok(line))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S: ChunkSource<Chunk = Vec<u8>>> Read for ChunkStream<S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos == self.buf.len() {
            if !self.pull()? {
                return Ok(0);
            }
        }
        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<S: ChunkSource> Drop for ChunkStream<S> {
    fn drop(&mut self) {
        if let Err(e) = self.drain_source() {
            tracing::debug!("Failed to drain stream source: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn byte_source(chunks: &[&[u8]]) -> IterSource<std::vec::IntoIter<Vec<u8>>> {
        IterSource(
            chunks
                .iter()
                .map(|c| c.to_vec())
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }

    fn text_source(chunks: &[&str]) -> IterSource<std::vec::IntoIter<String>> {
        IterSource(
            chunks
                .iter()
                .map(|c| (*c).to_string())
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }

    /// Split `data` into chunks whose sizes cycle through `sizes`.
    fn chunked(data: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < data.len() {
            let n = sizes[i % sizes.len()].min(data.len() - offset);
            out.push(data[offset..offset + n].to_vec());
            offset += n;
            i += 1;
        }
        out
    }

    #[test]
    fn test_concatenation_independent_of_chunking() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();

        for sizes in [&[1][..], &[3, 0, 17], &[512], &[4096, 1], &[6000]] {
            for read_size in [1, 2, 7, 100, 4096, 10_000] {
                let source = IterSource(chunked(&data, sizes).into_iter());
                let mut stream = ChunkStream::new(source);
                let mut out = Vec::new();
                loop {
                    let part = stream.read_units(read_size).unwrap();
                    if part.is_empty() {
                        break;
                    }
                    assert!(part.len() <= read_size);
                    out.extend_from_slice(&part);
                }
                assert_eq!(out, data, "chunks {sizes:?}, reads of {read_size}");
            }
        }
    }

    #[test]
    fn test_read_returns_full_count_until_exhausted() {
        let mut stream = ChunkStream::new(byte_source(&[b"ab", b"cde", b"f"]));
        assert_eq!(stream.read_units(4).unwrap(), b"abcd");
        assert_eq!(stream.read_units(4).unwrap(), b"ef");
        assert_eq!(stream.read_units(4).unwrap(), b"");
        assert_eq!(stream.read_units(4).unwrap(), b"");
        assert!(stream.is_exhausted());
    }

    #[test]
    fn test_io_read_impl() {
        let mut stream = ChunkStream::new(byte_source(&[b"hello ", b"", b"world"]));
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_text_counts_characters() {
        let mut stream = ChunkStream::new(text_source(&["héllo", " wörld"]));
        assert_eq!(stream.read_units(2).unwrap(), "hé");
        assert_eq!(stream.read_units(6).unwrap(), "llo wö");
        assert_eq!(stream.read_all().unwrap(), "rld");
    }

    #[test]
    fn test_read_line_across_chunks() {
        let mut stream = ChunkStream::new(text_source(&["first li", "ne\nsecond\nthi", "rd"]));
        assert_eq!(stream.read_line().unwrap(), "first line\n");
        assert_eq!(stream.read_line().unwrap(), "second\n");
        assert_eq!(stream.read_line().unwrap(), "third");
        assert_eq!(stream.read_line().unwrap(), "");
    }

    #[test]
    fn test_lines_iterator_strips_terminators() {
        let mut stream = ChunkStream::new(text_source(&["a\r\nb\n", "\nc"]));
        let lines: Vec<String> = stream.lines().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["a", "b", "", "c"]);
    }

    #[test]
    fn test_mixed_line_and_sized_reads() {
        let mut stream = ChunkStream::new(text_source(&["ab\ncd", "ef\n"]));
        assert_eq!(stream.read_line().unwrap(), "ab\n");
        assert_eq!(stream.read_units(3).unwrap(), "cde");
        assert_eq!(stream.read_line().unwrap(), "f\n");
    }

    struct CountingSource {
        remaining: usize,
        pulled: Rc<Cell<usize>>,
    }

    impl ChunkSource for CountingSource {
        type Chunk = Vec<u8>;

        fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            self.pulled.set(self.pulled.get() + 1);
            Ok(Some(vec![0u8; 10]))
        }
    }

    #[test]
    fn test_drop_drains_source() {
        let pulled = Rc::new(Cell::new(0));
        {
            let mut stream = ChunkStream::new(CountingSource {
                remaining: 5,
                pulled: pulled.clone(),
            });
            stream.read_units(3).unwrap();
            assert_eq!(pulled.get(), 1);
        }
        assert_eq!(pulled.get(), 5);
    }

    #[test]
    fn test_close_drains_source() {
        let pulled = Rc::new(Cell::new(0));
        let stream = ChunkStream::new(CountingSource {
            remaining: 3,
            pulled: pulled.clone(),
        });
        stream.close().unwrap();
        assert_eq!(pulled.get(), 3);
    }

    #[test]
    fn test_utf8_source_joins_split_characters() {
        let bytes = "añb€".as_bytes();
        // Split inside both multi-byte characters.
        let source = Utf8Source::new(byte_source(&[&bytes[..2], &bytes[2..5], &bytes[5..]]));
        let mut stream = ChunkStream::new(source);
        assert_eq!(stream.read_all().unwrap(), "añb€");
    }

    #[test]
    fn test_read_source_chunks_reader() {
        let data = vec![1u8; 10];
        let mut source = ReadSource::with_chunk_size(&data[..], 4);
        assert_eq!(source.next_chunk().unwrap().unwrap().len(), 4);
        assert_eq!(source.next_chunk().unwrap().unwrap().len(), 4);
        assert_eq!(source.next_chunk().unwrap().unwrap().len(), 2);
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_text_read_spanning_many_chunks() {
        // One character per chunk; every pull resumes where the last walk stopped.
        let chunks: Vec<String> = std::iter::repeat_n("é".to_string(), 100_000).collect();
        let mut stream = ChunkStream::new(IterSource(chunks.into_iter()));
        let head = stream.read_units(3).unwrap();
        assert_eq!(head, "ééé");
        let rest = stream.read_all().unwrap();
        assert_eq!(rest.chars().count(), 99_997);
        assert!(stream.is_exhausted());
    }

    #[test]
    fn test_long_line_over_small_chunks() {
        let mut chunks: Vec<String> = std::iter::repeat_n("ab".to_string(), 50_000).collect();
        chunks.push("\nnext".to_string());
        let mut stream = ChunkStream::new(IterSource(chunks.into_iter()));
        let line = stream.read_line().unwrap();
        assert_eq!(line.len(), 100_001);
        assert!(line.ends_with("ab\n"));
        assert_eq!(stream.read_line().unwrap(), "next");
    }
}
