//! Pass-through decorators that meter the bytes moving through a stream.

use std::fmt::{self, Debug};
use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::time::Instant;

/// A reader that counts the bytes read through it.
///
/// Transparent apart from the counting: every `Read` call is forwarded to
/// the inner reader. [`total_bytes`] reports the running count and
/// [`bytes_per_sec`] the average throughput since construction.
///
/// [`total_bytes`]: MeteredReader::total_bytes
/// [`bytes_per_sec`]: MeteredReader::bytes_per_sec
pub struct MeteredReader<R> {
    inner: R,
    started: Instant,
    total: u64,
}

impl<R> MeteredReader<R> {
    /// Wrap `inner`, starting the throughput clock now.
    #[inline]
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            started: Instant::now(),
            total: 0,
        }
    }

    /// Total bytes read so far.
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Average throughput in bytes per second since construction, or 0
    /// before the first byte.
    #[must_use]
    pub fn bytes_per_sec(&self) -> u64 {
        bytes_per_sec(self.total, self.started)
    }

    /// Get a reference to the inner reader.
    #[inline]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Get a mutable reference to the inner reader.
    #[inline]
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume this wrapper and return the inner reader.
    #[inline]
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for MeteredReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.total += n as u64;
        Ok(n)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut]) -> io::Result<usize> {
        let n = self.inner.read_vectored(bufs)?;
        self.total += n as u64;
        Ok(n)
    }
}

impl<R: Debug> Debug for MeteredReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MeteredReader")
            .field("inner", &self.inner)
            .field("total_bytes", &self.total)
            .finish()
    }
}

/// A writer that counts the bytes written through it.
///
/// The counterpart of [`MeteredReader`] for the write direction.
pub struct MeteredWriter<W> {
    inner: W,
    started: Instant,
    total: u64,
}

impl<W> MeteredWriter<W> {
    /// Wrap `inner`, starting the throughput clock now.
    #[inline]
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            started: Instant::now(),
            total: 0,
        }
    }

    /// Total bytes written so far.
    #[inline]
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Average throughput in bytes per second since construction, or 0
    /// before the first byte.
    #[must_use]
    pub fn bytes_per_sec(&self) -> u64 {
        bytes_per_sec(self.total, self.started)
    }

    /// Get a reference to the inner writer.
    #[inline]
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Get a mutable reference to the inner writer.
    #[inline]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume this wrapper and return the inner writer.
    #[inline]
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for MeteredWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.total += n as u64;
        Ok(n)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice]) -> io::Result<usize> {
        let n = self.inner.write_vectored(bufs)?;
        self.total += n as u64;
        Ok(n)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Debug> Debug for MeteredWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MeteredWriter")
            .field("inner", &self.inner)
            .field("total_bytes", &self.total)
            .finish()
    }
}

fn bytes_per_sec(total: u64, started: Instant) -> u64 {
    if total == 0 {
        return 0;
    }
    let nanos = started.elapsed().as_nanos().max(1);
    ((u128::from(total) * 1_000_000_000) / nanos) as u64
}
