//! Moving captured messages from the queue into the archive and the index.
//!
//! [`QueueLog`] lists what the capture workers have queued,
//! [`BackgroundIndexer`] consumes it in order, and [`Trawl`] runs both sides
//! together.

pub mod error;
mod indexer;
mod queue;
mod service;

pub use crate::indexer::{BackgroundIndexer, Processed};
pub use crate::queue::QueueLog;
pub use crate::service::Trawl;
