//! Background writer tasks, their completion handles, and executors.

use crate::chan::Sink;
use parking::Parker;
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;

/// A unit of background work accepted by an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The write routine driven by a [`SinkReader`], boxed for storage until
/// the first read starts it.
///
/// [`SinkReader`]: crate::SinkReader
pub(crate) type WriteFn = Box<dyn FnOnce(&mut Sink) -> io::Result<()> + Send + 'static>;

/// Where writer tasks run.
///
/// [`SinkReader`] uses a [`ThreadExecutor`] unless told otherwise; a caller
/// that wants to bound the number of writer threads can supply its own
/// implementation, for example a handle to a worker pool. Implementations
/// must accept submissions from multiple streams concurrently.
///
/// [`SinkReader`]: crate::SinkReader
pub trait Executor {
    /// Schedule `task` to run. The task is run exactly once; it must not be
    /// dropped without running, or the stream that submitted it will wait
    /// for a completion that never comes.
    fn execute(&self, task: Task) -> io::Result<()>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    #[inline]
    fn execute(&self, task: Task) -> io::Result<()> {
        (**self).execute(task)
    }
}

/// The default executor: each task runs on a freshly spawned thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) -> io::Result<()> {
        thread::Builder::new()
            .name("piped-streams writer".to_owned())
            .spawn(task)?;
        Ok(())
    }
}

/// Observes the completion of one writer task.
///
/// The reading side holds the handle; the task holds the matching
/// [`Outcome`] and fills it in exactly once. Only one thread ever waits on
/// a given handle, so completion is signaled by unparking that thread.
pub(crate) struct TaskHandle {
    outcome: Arc<Outcome>,
    parker: Parker,
}

struct Outcome {
    result: Mutex<Option<io::Result<()>>>,
    done: AtomicBool,
}

impl TaskHandle {
    /// Whether the task has completed. Non-blocking.
    pub(crate) fn is_done(&self) -> bool {
        self.outcome.done.load(SeqCst)
    }

    /// Block until the task completes. Returns immediately if it already
    /// has; safe to call any number of times.
    pub(crate) fn wait(&self) {
        while !self.is_done() {
            self.parker.park();
        }
    }

    /// Take the task's failure. Returns `None` if the task succeeded, if it
    /// has not completed, or if the failure was already taken; a given
    /// failure can be observed at most once.
    pub(crate) fn take_error(&self) -> Option<io::Error> {
        match self.outcome.result.lock().take() {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }
}

/// Submit a task to `executor` that runs `write` against `sink`.
///
/// However the routine ends, even by panicking, the sink is closed before
/// the task is marked done, so the reader can never block forever on a
/// writer that forgot to close, and the recorded outcome is definite by the
/// time [`TaskHandle::wait`] returns.
pub(crate) fn spawn_writer(
    executor: &dyn Executor,
    mut sink: Sink,
    write: WriteFn,
) -> io::Result<TaskHandle> {
    let parker = Parker::new();
    let unparker = parker.unparker();
    let outcome = Arc::new(Outcome {
        result: Mutex::new(None),
        done: AtomicBool::new(false),
    });
    let shared = outcome.clone();
    executor.execute(Box::new(move || {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| write(&mut sink))) {
            Ok(result) => result,
            Err(payload) => {
                tracing::debug!("writer task panicked");
                Err(panic_error(payload))
            }
        };
        sink.close();
        *shared.result.lock() = Some(result);
        shared.done.store(true, SeqCst);
        unparker.unpark();
    }))?;
    Ok(TaskHandle { outcome, parker })
}

fn panic_error(payload: Box<dyn std::any::Any + Send>) -> io::Error {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    };
    io::Error::new(io::ErrorKind::Other, format!("writer task panicked: {msg}"))
}
