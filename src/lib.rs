//! Piped I/O streams: pull-style readers fed by push-style writers.
//!
//! The flagship type is [`SinkReader`]: hand it a routine that pushes bytes
//! into a [`Sink`], and pull those bytes back out through [`std::io::Read`]
//! while the routine runs on a background task. The two sides are joined by
//! a bounded in-memory channel, so neither gets far ahead of the other, and
//! a failing routine has its error delivered to the reader instead of being
//! lost on the background thread. Writer tasks run on a dedicated thread by
//! default, or on a caller-supplied [`Executor`].
//!
//! Around it are a few small stream utilities: [`StringReader`] for reading
//! a fixed string, [`DeleteOnCloseReader`] for a file that should not
//! outlive its stream, and [`MeteredReader`]/[`MeteredWriter`] for counting
//! the bytes moving through a stream.

#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod chan;
mod meter;
mod streams;
mod task;

pub use chan::Sink;
pub use meter::{MeteredReader, MeteredWriter};
pub use streams::{DeleteOnCloseReader, SinkReader, StringReader};
pub use task::{Executor, Task, ThreadExecutor};
