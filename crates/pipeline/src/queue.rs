//! The queue directory, read from the indexer's side.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use exn::ResultExt;
use trawl_capture::{MessageId, QUEUE_LOG_EXTENSION, log_path};

use crate::error::{ErrorKind, Result};

/// Queue logs waiting to be indexed.
///
/// Workers only ever add complete files by rename, so anything listed here can
/// be read in full.
#[derive(Debug, Clone)]
pub struct QueueLog {
    dir: PathBuf,
}

impl QueueLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, id: MessageId) -> PathBuf {
        log_path(&self.dir, id, QUEUE_LOG_EXTENSION)
    }

    /// Every queued message, oldest first. A missing directory is an empty
    /// queue.
    pub fn pending(&self) -> Result<Vec<MessageId>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Queue(self.dir.clone())),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.or_raise(|| ErrorKind::Queue(self.dir.clone()))?;
            if let Some(id) = entry.file_name().to_str().and_then(|name| MessageId::from_file_name(name, QUEUE_LOG_EXTENSION))
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn read(&self, id: MessageId) -> Result<Vec<u8>> {
        let path = self.path(id);
        fs::read(&path).or_raise(|| ErrorKind::Queue(path))
    }

    /// Mark `id` as consumed. Removing an entry that is already gone is fine.
    pub fn remove(&self, id: MessageId) -> Result<()> {
        let path = self.path(id);
        match fs::remove_file(&path) {
            Err(err) if err.kind() != IoErrorKind::NotFound => Err(err).or_raise(|| ErrorKind::Queue(path)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["000000000010.qlog", "000000000002.qlog", "000000000002.mlog", "notes.txt", "000000000007.qlog"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let queue = QueueLog::new(dir.path());
        let pending: Vec<u64> = queue.pending().unwrap().into_iter().map(u64::from).collect();
        assert_eq!(pending, vec![2, 7, 10]);

        queue.remove(MessageId::new(7)).unwrap();
        queue.remove(MessageId::new(7)).unwrap();
        assert_eq!(queue.pending().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueLog::new(dir.path().join("nope"));
        assert!(queue.pending().unwrap().is_empty());
    }
}
