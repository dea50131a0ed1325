// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Byte sources and sinks consumed by demuxers and container writers.
//!
//! The core does not own file-system or network semantics: anything that is
//! `Read + Seek` (or `Write + Seek`) can back a container. Files come from
//! `std::fs::File`; [`MemorySource`] and [`MemorySink`] cover in-memory buffers
//! and [`NonSeekable`] models pipes and sockets.

use bytes::Bytes;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

/// Input side of a container.
pub trait ByteSource: Read + Seek + Send {}
impl<T: Read + Seek + Send> ByteSource for T {}

/// Output side of a container.
pub trait ByteSink: Write + Seek + Send {}
impl<T: Write + Seek + Send> ByteSink for T {}

/// Read-only in-memory source.
pub type MemorySource = Cursor<Bytes>;

pub fn memory_source(data: impl Into<Bytes>) -> MemorySource {
    Cursor::new(data.into())
}

/// In-memory sink whose contents stay reachable after the sink has been moved
/// into a writer thread.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Bytes {
        self.inner.lock().map(|c| Bytes::copy_from_slice(c.get_ref())).unwrap_or_default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Cursor<Vec<u8>>) -> io::Result<R>) -> io::Result<R> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("memory sink lock poisoned"))?;
        f(&mut guard)
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|c| c.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemorySink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.with(|c| c.seek(pos))
    }
}

/// Wraps a reader or writer that cannot seek.
///
/// `stream_position` style queries (`SeekFrom::Current(0)`) are answered from an
/// internal byte counter; any real seek fails with `Unsupported`.
pub struct NonSeekable<T> {
    inner: T,
    position: u64,
}

impl<T> NonSeekable<T> {
    pub const fn new(inner: T) -> Self {
        Self { inner, position: 0 }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Read for NonSeekable<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<T: Write> Write for NonSeekable<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T> Seek for NonSeekable<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(io::ErrorKind::Unsupported, "source is not seekable")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shared_contents() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_all(b"abcd").unwrap_or_default();
        writer.seek(SeekFrom::Start(1)).unwrap_or_default();
        writer.write_all(b"X").unwrap_or_default();
        assert_eq!(&sink.contents()[..], b"aXcd");
    }

    #[test]
    fn test_non_seekable_rejects_seek() {
        let mut src = NonSeekable::new(&b"hello"[..]);
        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf).ok(), Some(2));
        assert_eq!(src.stream_position().ok(), Some(2));
        let err = src.seek(SeekFrom::Start(0)).err().map(|e| e.kind());
        assert_eq!(err, Some(io::ErrorKind::Unsupported));
    }
}
