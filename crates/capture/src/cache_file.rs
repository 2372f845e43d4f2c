//! Capture buffers that persist to the log directory.
//!
//! Every captured message ends up as a pair of files:
//!
//! ```text
//! weblog/000000000042.mlog   the message, kept for reference
//! queue/000000000042.qlog    the same message, pending indexing
//! ```
//!
//! The two directories may be the same. Each file is written to a temporary
//! file in its target directory, synced, and
//! renamed into place, so a reader never sees a half-written log. The message
//! log goes first and is removed again if the queue log can't be written: a
//! queue log therefore never exists without its message log.

use std::fs;
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use exn::{OptionExt, ResultExt};
use tempfile::NamedTempFile;
use tracing::instrument;

use crate::buffer::BoundedBuffer;
use crate::error::{ErrorKind, Result};
use crate::id::MessageId;

pub const MESSAGE_LOG_EXTENSION: &str = "mlog";
pub const QUEUE_LOG_EXTENSION: &str = "qlog";

/// Path of the log file for `id` with `extension` in `dir`.
pub fn log_path(dir: &Path, id: MessageId, extension: &str) -> PathBuf {
    dir.join(format!("{id}.{extension}"))
}

/// Where the two halves of a log pair go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirs {
    pub messages: PathBuf,
    pub queue: PathBuf,
}

impl LogDirs {
    pub fn new(messages: impl Into<PathBuf>, queue: impl Into<PathBuf>) -> Self {
        Self {
            messages: messages.into(),
            queue: queue.into(),
        }
    }

    /// Keep both logs in one directory.
    pub fn single(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            messages: dir.clone(),
            queue: dir,
        }
    }

    pub fn message_log(&self, id: MessageId) -> PathBuf {
        log_path(&self.messages, id, MESSAGE_LOG_EXTENSION)
    }

    pub fn queue_log(&self, id: MessageId) -> PathBuf {
        log_path(&self.queue, id, QUEUE_LOG_EXTENSION)
    }
}

/// A [`BoundedBuffer`] bound to the log directories.
#[derive(Debug)]
pub struct CacheFile {
    buffer: BoundedBuffer,
    dirs: LogDirs,
}

impl CacheFile {
    pub fn new(dirs: LogDirs, capacity: usize) -> Self {
        Self {
            buffer: BoundedBuffer::new(capacity),
            dirs,
        }
    }

    pub fn dirs(&self) -> &LogDirs {
        &self.dirs
    }

    /// Write the buffer to `<id>.mlog`.
    pub fn write_message_log(&self, id: MessageId) -> Result<PathBuf> {
        self.write_log(self.dirs.message_log(id))
    }

    /// Write the buffer to `<id>.qlog`.
    pub fn write_queue_log(&self, id: MessageId) -> Result<PathBuf> {
        self.write_log(self.dirs.queue_log(id))
    }

    /// Write both logs for `id`, message log first.
    ///
    /// If the queue log fails, the message log is removed again before the
    /// error is returned.
    #[instrument(skip_all, fields(%id, size = self.buffer.len()))]
    pub fn persist(self, id: MessageId) -> Result<()> {
        let message_log = self.write_message_log(id)?;
        if let Err(err) = self.write_queue_log(id) {
            if let Err(cleanup) = fs::remove_file(&message_log) {
                tracing::error!(path = %message_log.display(), error = %cleanup, "failed to roll back message log");
            }
            return Err(err);
        }
        tracing::debug!("persisted log pair");
        Ok(())
    }

    /// Drop the captured bytes without writing anything.
    pub fn discard(mut self) {
        if !self.buffer.is_empty() {
            tracing::trace!(size = self.buffer.len(), overflow = self.buffer.is_overflow(), "discarding cache file");
        }
        self.buffer.clear();
    }

    fn write_log(&self, path: PathBuf) -> Result<PathBuf> {
        let fail = || ErrorKind::Persist(path.clone());
        let dir = path.parent().ok_or_raise(fail)?;
        let mut temp = NamedTempFile::new_in(dir).or_raise(fail)?;
        temp.write_all(self.buffer.as_bytes()).or_raise(fail)?;
        temp.as_file().sync_all().or_raise(fail)?;
        temp.persist(&path).or_raise(fail)?;
        Ok(path)
    }
}

impl Deref for CacheFile {
    type Target = BoundedBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for CacheFile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u64) -> MessageId {
        MessageId::new(value)
    }

    #[test]
    fn test_persist_writes_both_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheFile::new(LogDirs::single(dir.path()), 64);
        assert!(cache.write(b"uri: http://a/\n\nbody"));
        cache.persist(id(7)).unwrap();

        let mlog = dir.path().join("000000000007.mlog");
        let qlog = dir.path().join("000000000007.qlog");
        assert_eq!(fs::read(mlog).unwrap(), b"uri: http://a/\n\nbody");
        assert_eq!(fs::read(qlog).unwrap(), b"uri: http://a/\n\nbody");
        // No temporary files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_separate_directories() {
        let weblog = tempfile::tempdir().unwrap();
        let queue = tempfile::tempdir().unwrap();
        let mut cache = CacheFile::new(LogDirs::new(weblog.path(), queue.path()), 64);
        cache.write(b"x");
        cache.persist(id(2)).unwrap();
        assert!(weblog.path().join("000000000002.mlog").is_file());
        assert!(queue.path().join("000000000002.qlog").is_file());
        assert!(!weblog.path().join("000000000002.qlog").exists());
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let mut cache = CacheFile::new(LogDirs::single(&missing), 64);
        cache.write(b"x");
        let err = cache.persist(id(1)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Persist(path) if path.starts_with(&missing)));
        assert!(!missing.exists());
    }

    #[test]
    fn test_queue_log_failure_rolls_back_message_log() {
        let dir = tempfile::tempdir().unwrap();
        // A directory squatting on the queue log name makes the rename fail.
        fs::create_dir(dir.path().join("000000000003.qlog")).unwrap();
        let mut cache = CacheFile::new(LogDirs::single(dir.path()), 64);
        cache.write(b"x");
        let err = cache.persist(id(3)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Persist(_)));
        assert!(!dir.path().join("000000000003.mlog").exists());
    }

    #[test]
    fn test_overwrite_is_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("000000000009.mlog"), b"old").unwrap();
        let mut cache = CacheFile::new(LogDirs::single(dir.path()), 64);
        cache.write(b"new");
        cache.write_message_log(id(9)).unwrap();
        assert_eq!(fs::read(dir.path().join("000000000009.mlog")).unwrap(), b"new");
    }

    #[test]
    fn test_discard_empty() {
        let dir = tempfile::tempdir().unwrap();
        CacheFile::new(LogDirs::single(dir.path()), 8).discard();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
