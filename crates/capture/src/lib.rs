//! Capturing messages into durable log pairs.
//!
//! A proxy worker writes each intercepted exchange into a [`CacheFile`], a
//! [`BoundedBuffer`] that rejects anything past its capacity. Messages that
//! fit are persisted as a message log and a queue log with atomic renames,
//! and the background indexer is notified. The [`WorkerPool`] bounds how
//! many captures run at once.

mod buffer;
mod cache_file;
pub mod error;
mod id;
mod pool;
mod recorder;

pub use crate::buffer::BoundedBuffer;
pub use crate::cache_file::{CacheFile, LogDirs, MESSAGE_LOG_EXTENSION, QUEUE_LOG_EXTENSION, log_path};
pub use crate::id::{MESSAGE_ID_WIDTH, MessageId, MessageIdGenerator};
pub use crate::pool::WorkerPool;
pub use crate::recorder::{CapturedMessage, Recorded, Recorder};
