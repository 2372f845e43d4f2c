//! The worker side of capture: serialize, bound, persist, notify.

use std::io::Write;
use std::sync::Arc;

use crossbeam_channel::Sender;
use exn::ResultExt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use tracing::instrument;
use trawl_extract::{Headers, write_header_block};

use crate::cache_file::{CacheFile, LogDirs};
use crate::error::{ErrorKind, Result};
use crate::id::{MessageId, MessageIdGenerator};

/// One intercepted exchange, as handed over by the proxy front end.
#[derive(Debug, Clone, Default)]
pub struct CapturedMessage {
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl CapturedMessage {
    pub fn new(headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.headers.get("uri")
    }
}

/// What happened to a recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Persisted under this id and queued for indexing.
    Queued(MessageId),
    /// Too large for the cache buffer; nothing was written.
    Overflowed,
}

/// Persists captured messages and tells the indexer about them.
///
/// Cheap to clone; every pool worker holds one.
#[derive(Debug, Clone)]
pub struct Recorder {
    dirs: LogDirs,
    max_message_bytes: usize,
    ids: Arc<MessageIdGenerator>,
    notify: Option<Sender<MessageId>>,
}

impl Recorder {
    pub fn new(dirs: LogDirs, max_message_bytes: usize, ids: Arc<MessageIdGenerator>) -> Self {
        Self {
            dirs,
            max_message_bytes,
            ids,
            notify: None,
        }
    }

    /// Send the id of every queued message to `notify`.
    pub fn with_notify(mut self, notify: Sender<MessageId>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Record one message.
    ///
    /// A `date` header is added when the front end didn't supply one. An
    /// overflowing message is discarded and reported as
    /// [`Recorded::Overflowed`]; persistence failures are returned as errors.
    #[instrument(skip_all, fields(uri = message.uri(), size = message.body.len(), id))]
    pub fn record(&self, mut message: CapturedMessage) -> Result<Recorded> {
        if !message.headers.contains("date") {
            let now = OffsetDateTime::now_utc().format(&Rfc2822).or_raise(|| ErrorKind::Serialize)?;
            message.headers.insert("date", now);
        }

        let mut cache = CacheFile::new(self.dirs.clone(), self.max_message_bytes);
        write_header_block(&message.headers, &mut *cache).or_raise(|| ErrorKind::Serialize)?;
        cache.write_all(&message.body).or_raise(|| ErrorKind::Serialize)?;
        if cache.is_overflow() {
            tracing::warn!(limit = self.max_message_bytes, "message too large, discarding");
            cache.discard();
            return Ok(Recorded::Overflowed);
        }

        let id = self.ids.next_id();
        tracing::Span::current().record("id", tracing::field::display(id));
        cache.persist(id)?;
        if let Some(notify) = &self.notify
            && notify.send(id).is_err()
        {
            // The queue log is on disk; the indexer picks it up on its next start.
            tracing::debug!("indexer not listening");
        }
        Ok(Recorded::Queued(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn recorder(dir: &std::path::Path, limit: usize) -> Recorder {
        Recorder::new(LogDirs::single(dir), limit, Arc::new(MessageIdGenerator::starting_at(1)))
    }

    #[test]
    fn test_record_persists_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let recorder = recorder(dir.path(), 1024).with_notify(tx);
        let headers: Headers = [("uri", "http://example.com/"), ("date", "Sun, 18 Oct 2026 10:00:00 +0000")]
            .into_iter()
            .collect();

        let recorded = recorder.record(CapturedMessage::new(headers, "<p>hi</p>")).unwrap();
        assert_eq!(recorded, Recorded::Queued(MessageId::new(1)));
        assert_eq!(rx.try_recv().unwrap(), MessageId::new(1));
        let log = fs::read_to_string(dir.path().join("000000000001.qlog")).unwrap();
        assert_eq!(log, "uri: http://example.com/\ndate: Sun, 18 Oct 2026 10:00:00 +0000\n\n<p>hi</p>");
    }

    #[test]
    fn test_record_adds_date() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), 1024);
        let headers: Headers = [("uri", "http://example.com/")].into_iter().collect();
        recorder.record(CapturedMessage::new(headers, "x")).unwrap();
        let log = fs::read_to_string(dir.path().join("000000000001.mlog")).unwrap();
        assert!(log.lines().any(|line| line.starts_with("date: ")));
    }

    #[test]
    fn test_overflow_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), 64);
        let headers: Headers = [("uri", "http://example.com/")].into_iter().collect();
        let recorded = recorder.record(CapturedMessage::new(headers, vec![b'a'; 100])).unwrap();
        assert_eq!(recorded, Recorded::Overflowed);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_closed_notify_channel_still_records() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let recorder = recorder(dir.path(), 1024).with_notify(tx);
        let recorded = recorder.record(CapturedMessage::default()).unwrap();
        assert!(matches!(recorded, Recorded::Queued(_)));
    }
}
