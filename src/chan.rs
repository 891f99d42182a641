//! The in-memory bounded byte channel connecting a writer task to a reader.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::io::{self, Write};
use std::sync::Arc;

/// Buffer capacity used when none is given.
pub(crate) const DEFAULT_CAPACITY: usize = 4096;

/// Create a connected [`Sink`]/[`Source`] pair sharing a FIFO buffer that
/// holds at most `capacity` bytes.
///
/// `capacity` must be nonzero; a zero-capacity buffer could never accept a
/// byte and both ends would block forever.
pub(crate) fn bounded(capacity: usize) -> (Sink, Source) {
    assert!(capacity > 0, "channel capacity must be nonzero");
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            sink_closed: false,
            source_closed: false,
        }),
        space: Condvar::new(),
        data: Condvar::new(),
    });
    (
        Sink {
            shared: shared.clone(),
        },
        Source { shared },
    )
}

struct Shared {
    state: Mutex<State>,
    // The writer waits on `space`; the reader waits on `data`.
    space: Condvar,
    data: Condvar,
}

struct State {
    buf: VecDeque<u8>,
    capacity: usize,
    sink_closed: bool,
    source_closed: bool,
}

/// The write half of the channel, handed to the write routine of a
/// [`SinkReader`].
///
/// `write` blocks while the buffer is full and the reader is still there,
/// and fails with [`BrokenPipe`] once the reader has closed its end. Bytes
/// are visible to the reader in the order they were written, as soon as
/// they are written, so `flush` has nothing to do.
///
/// Dropping the sink closes it; [`close`] does the same explicitly, for
/// routines that finish writing before they finish running.
///
/// [`SinkReader`]: crate::SinkReader
/// [`BrokenPipe`]: std::io::ErrorKind::BrokenPipe
/// [`close`]: Sink::close
pub struct Sink {
    shared: Arc<Shared>,
}

/// The read half of the channel, owned by the reading stream.
pub(crate) struct Source {
    shared: Arc<Shared>,
}

impl Sink {
    /// Close the write half.
    ///
    /// Once the remaining buffered bytes are drained, the reader sees
    /// end-of-data. Idempotent; also performed on drop.
    pub fn close(&mut self) {
        let mut state = self.shared.state.lock();
        if !state.sink_closed {
            state.sink_closed = true;
            drop(state);
            self.shared.data.notify_one();
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.state.lock();
        loop {
            if state.source_closed || state.sink_closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            if state.buf.len() < state.capacity {
                break;
            }
            self.shared.space.wait(&mut state);
        }
        let n = buf.len().min(state.capacity - state.buf.len());
        state.buf.extend(&buf[..n]);
        drop(state);
        self.shared.data.notify_one();
        Ok(n)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        // Written bytes are already queued for the reader.
        Ok(())
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Sink")
            .field("buffered", &state.buf.len())
            .field("capacity", &state.capacity)
            .field("closed", &state.sink_closed)
            .finish()
    }
}

impl Source {
    /// Pull up to `buf.len()` bytes, blocking while the buffer is empty and
    /// the write half is open. Returns `0` only at end-of-data: the buffer
    /// is drained and the write half is closed.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut state = self.shared.state.lock();
        while state.buf.is_empty() && !state.sink_closed {
            self.shared.data.wait(&mut state);
        }
        let n = buf.len().min(state.buf.len());
        for (dst, src) in buf.iter_mut().zip(state.buf.drain(..n)) {
            *dst = src;
        }
        drop(state);
        if n > 0 {
            self.shared.space.notify_one();
        }
        n
    }

    /// Close the read half, waking a writer blocked on a full buffer so it
    /// can fail with `"pipe closed"`. Idempotent; also performed on drop.
    pub(crate) fn close(&mut self) {
        let mut state = self.shared.state.lock();
        if !state.source_closed {
            state.source_closed = true;
            state.buf.clear();
            drop(state);
            self.shared.space.notify_one();
        }
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Source")
            .field("buffered", &state.buf.len())
            .field("closed", &state.source_closed)
            .finish()
    }
}
