//! The crate's public stream types.

use crate::chan::{self, Sink, Source, DEFAULT_CAPACITY};
use crate::task::{self, Executor, TaskHandle, ThreadExecutor, WriteFn};
use std::fmt::{self, Debug};
use std::fs::{self, File};
use std::io::{self, Cursor, IoSliceMut, Read, Seek, SeekFrom};
use std::mem;
use std::path::{Path, PathBuf};

/// A pull-style reader fed by a push-style write routine.
///
/// The routine receives the [`Sink`] half of an in-memory bounded channel
/// and runs on a background task; this reader consumes the other half
/// through [`std::io::Read`]. Nothing runs until the first read: the
/// channel is created and the routine submitted lazily, so constructing a
/// `SinkReader` is free and a reader that is closed unread never starts a
/// task at all.
///
/// A routine that fails has its error captured and re-raised to the reader
/// exactly once, either from the read that observes it or from [`close`];
/// it is never reported twice and never swallowed behind a clean
/// end-of-stream. A reader that is closed while the routine is still
/// writing does not wait for it: the routine's next write fails with
/// [`BrokenPipe`] and the routine is expected to bail out on its own.
///
/// # Examples
///
/// ```
/// use piped_streams::SinkReader;
/// use std::io::{Read, Write};
///
/// let mut reader = SinkReader::new(|sink| {
///     sink.write_all(b"Hello, world!")?;
///     Ok(())
/// });
///
/// let mut text = String::new();
/// reader.read_to_string(&mut text)?;
/// assert_eq!(text, "Hello, world!");
/// reader.close()?;
/// # Ok::<(), std::io::Error>(())
/// ```
///
/// [`close`]: SinkReader::close
/// [`BrokenPipe`]: std::io::ErrorKind::BrokenPipe
pub struct SinkReader {
    capacity: usize,
    executor: Box<dyn Executor + Send>,
    state: State,
    result_checked: bool,
}

enum State {
    /// Constructed but never read; holds the unstarted routine.
    Idle { write: WriteFn },
    /// First read has happened; channel and task are live.
    Reading { source: Source, task: TaskHandle },
    Closed,
}

impl SinkReader {
    /// Create a reader over `write` with the default buffer capacity of
    /// 4096 bytes, running the routine on its own thread.
    #[must_use]
    pub fn new<F>(write: F) -> Self
    where
        F: FnOnce(&mut Sink) -> io::Result<()> + Send + 'static,
    {
        Self::with_capacity(DEFAULT_CAPACITY, write)
    }

    /// Create a reader over `write` whose channel buffers at most
    /// `capacity` bytes, running the routine on its own thread.
    ///
    /// A routine that gets ahead of the reader by more than `capacity`
    /// bytes blocks until the reader catches up.
    #[must_use]
    pub fn with_capacity<F>(capacity: usize, write: F) -> Self
    where
        F: FnOnce(&mut Sink) -> io::Result<()> + Send + 'static,
    {
        Self::with_executor(ThreadExecutor, capacity, write)
    }

    /// Create a reader over `write` that submits the routine to `executor`
    /// instead of spawning a dedicated thread.
    ///
    /// Use this to run many readers' routines on a shared worker pool. The
    /// executor is not consulted until the first read.
    #[must_use]
    pub fn with_executor<E, F>(executor: E, capacity: usize, write: F) -> Self
    where
        E: Executor + Send + 'static,
        F: FnOnce(&mut Sink) -> io::Result<()> + Send + 'static,
    {
        Self {
            capacity,
            executor: Box::new(executor),
            state: State::Idle {
                write: Box::new(write),
            },
            result_checked: false,
        }
    }

    /// Close the reader.
    ///
    /// If the write routine has already completed, a failure it recorded is
    /// raised here, unless a read raised it first. If the routine is still
    /// running, `close` returns immediately without waiting for it; the
    /// abandoned routine sees `"pipe closed"` on its next write. Closing a
    /// reader that was never read starts nothing. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, State::Closed) {
            State::Idle { .. } => {
                tracing::trace!("close() before any read; no writer to consult");
                Ok(())
            }
            State::Closed => Ok(()),
            State::Reading { mut source, task } => {
                source.close();
                if !task.is_done() {
                    tracing::debug!("stream closed while writer still running");
                    return Ok(());
                }
                if !self.result_checked {
                    self.result_checked = true;
                    if let Some(cause) = task.take_error() {
                        return Err(propagated(cause));
                    }
                }
                Ok(())
            }
        }
    }

    /// On the first read, create the channel and submit the writer task.
    fn activate(&mut self) -> io::Result<()> {
        if let State::Idle { .. } = self.state {
            let prev = mem::replace(&mut self.state, State::Closed);
            if let State::Idle { write } = prev {
                tracing::trace!(capacity = self.capacity, "starting writer task");
                let (sink, source) = chan::bounded(self.capacity);
                let task = task::spawn_writer(&*self.executor, sink, write)?;
                self.state = State::Reading { source, task };
            } else {
                self.state = prev;
            }
        }
        Ok(())
    }
}

impl Read for SinkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.activate()?;
        match &mut self.state {
            State::Reading { source, task } => {
                let n = source.read(buf);
                let done = task.is_done();
                if n == 0 {
                    // The channel is drained and closed, so the routine is
                    // past its last write; its outcome is moments away.
                    task.wait();
                }
                if (n == 0 || done) && !self.result_checked {
                    self.result_checked = true;
                    if let Some(cause) = task.take_error() {
                        return Err(propagated(cause));
                    }
                }
                Ok(n)
            }
            _ => Err(closed()),
        }
    }
}

impl Debug for SinkReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match &self.state {
            State::Idle { .. } => "idle",
            State::Reading { .. } => "reading",
            State::Closed => "closed",
        };
        f.debug_struct("SinkReader")
            .field("capacity", &self.capacity)
            .field("state", &state)
            .finish()
    }
}

/// Re-raise a writer failure to the reader, keeping the original error
/// reachable through [`io::Error::get_ref`] and its message intact.
fn propagated(cause: io::Error) -> io::Error {
    io::Error::new(cause.kind(), cause)
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "stream closed")
}

/// A reader over the UTF-8 bytes of an owned string.
///
/// Also implements [`Seek`], so consumed bytes can be revisited.
///
/// # Examples
///
/// ```
/// use piped_streams::StringReader;
/// use std::io::Read;
///
/// let mut reader = StringReader::new("twelve chars");
/// assert_eq!(reader.len(), 12);
/// let mut text = String::new();
/// reader.read_to_string(&mut text)?;
/// assert_eq!(text, "twelve chars");
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct StringReader {
    inner: Cursor<String>,
}

impl StringReader {
    /// Create a reader over `s`.
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self {
            inner: Cursor::new(s.into()),
        }
    }

    /// The length of the underlying string, in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    /// Whether the underlying string is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }
}

impl Read for StringReader {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    #[inline]
    fn read_vectored(&mut self, bufs: &mut [IoSliceMut]) -> io::Result<usize> {
        self.inner.read_vectored(bufs)
    }
}

impl Seek for StringReader {
    #[inline]
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Debug for StringReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StringReader")
            .field("len", &self.len())
            .field("position", &self.inner.position())
            .finish()
    }
}

/// A file reader that deletes the backing file when closed.
///
/// Useful for handing out a stream over a spooled file whose lifetime
/// should end with the stream's. Closing happens on [`close`] or on drop,
/// whichever comes first; the file handle is released before the unlink.
/// An explicit `close` reports a failed deletion as an error, while the
/// drop path only logs it.
///
/// [`close`]: DeleteOnCloseReader::close
pub struct DeleteOnCloseReader {
    file: Option<File>,
    path: PathBuf,
}

impl DeleteOnCloseReader {
    /// Open the file at `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// The path of the backing file.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the stream and delete the backing file. Idempotent; further
    /// reads fail.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            // The handle must be released before the unlink can succeed
            // everywhere.
            drop(file);
            tracing::debug!(path = %self.path.display(), "deleting file on close");
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Read for DeleteOnCloseReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.read(buf),
            None => Err(closed()),
        }
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.read_vectored(bufs),
            None => Err(closed()),
        }
    }
}

impl Drop for DeleteOnCloseReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to delete file on close");
        }
    }
}

impl Debug for DeleteOnCloseReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeleteOnCloseReader")
            .field("path", &self.path)
            .field("closed", &self.file.is_none())
            .finish()
    }
}
