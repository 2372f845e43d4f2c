//! The single consumer of the queue: distill, archive, index.
//!
//! Queue logs are processed strictly in id order, one at a time, and each one
//! is committed to the index before its queue log is removed. After a crash
//! the remaining queue logs are simply replayed:
//!
//! - already in the index: only the queue log is removed
//! - archived but not indexed (it is the archive's last entry): indexed under
//!   the id it was archived with, ahead of any older message still queued
//! - otherwise: processed normally

use std::collections::BTreeMap;
use std::time::Duration;

use crossbeam_channel::{Receiver, never, select};
use exn::ResultExt;
use tracing::instrument;
use trawl_archive::{ArchiveOptions, ArchiveStore, DocId};
use trawl_capture::MessageId;
use trawl_config::{Config, PathName};
use trawl_extract::distill_message;
use trawl_search::{IndexFeeder, SCHEMA_VERSION, SearchIndex, VersionStatus};

use crate::error::{ErrorKind, Result};
use crate::queue::QueueLog;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What [`BackgroundIndexer::process`] did with a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Archived and indexed under a new id.
    Indexed(DocId),
    /// Had been archived before a crash; now indexed too.
    Reindexed(DocId),
    /// Had been fully processed before a crash.
    AlreadyIndexed,
}

pub struct BackgroundIndexer {
    queue: QueueLog,
    archive: ArchiveStore,
    feeder: IndexFeeder,
    poll_interval: Duration,
}

impl BackgroundIndexer {
    pub fn new(queue: QueueLog, archive: ArchiveStore, feeder: IndexFeeder) -> Self {
        Self {
            queue,
            archive,
            feeder,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Open the queue, archive and index where `config` says they live.
    #[instrument(skip_all)]
    pub fn open(config: &Config) -> Result<Self> {
        let options = ArchiveOptions {
            entries_per_container: config.archive.entries_per_container,
            compression: config.compression().or_raise(|| ErrorKind::Config)?,
        };
        let archive = ArchiveStore::open(config.path(PathName::Archive), options).or_raise(|| ErrorKind::Archive)?;
        let search = SearchIndex::open(config.path(PathName::Index)).or_raise(|| ErrorKind::Index)?;
        match search.version_status().or_raise(|| ErrorKind::Index)? {
            VersionStatus::Mismatch(found) => {
                tracing::warn!(found, expected = SCHEMA_VERSION, "index was built with another schema version");
            },
            VersionStatus::Current | VersionStatus::Missing => {},
        }
        let feeder = search.feeder(config.index.writer_memory_bytes).or_raise(|| ErrorKind::Index)?;
        Ok(Self::new(QueueLog::new(config.path(PathName::Queue)), archive, feeder)
            .with_poll_interval(config.poll_interval()))
    }

    /// How long [`run`](Self::run) waits for a notification before rescanning
    /// the queue anyway.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn search(&self) -> &SearchIndex {
        &self.feeder
    }

    pub fn queue(&self) -> &QueueLog {
        &self.queue
    }

    /// Process every pending queue entry in id order.
    ///
    /// Stops at the first failure so later messages can't overtake it; the
    /// failed entry stays queued and is retried on the next drain.
    #[instrument(skip_all, fields(pending))]
    pub fn drain(&mut self) -> Result<usize> {
        let mut pending = self.queue.pending()?;
        tracing::Span::current().record("pending", pending.len());
        // The message archived last before a crash goes first, while it is
        // still the archive's last entry. An older message persisted late
        // would otherwise be archived after it and it would be archived twice.
        if let Some(last) = self.archive.last_entry()
            && let Some(at) = pending.iter().position(|id| id.to_string() == last.source)
        {
            let id = pending.remove(at);
            pending.insert(0, id);
        }
        for &id in &pending {
            self.process(id)?;
        }
        Ok(pending.len())
    }

    /// Move one queued message into the archive and the index.
    #[instrument(skip(self), fields(%id, doc))]
    pub fn process(&mut self, id: MessageId) -> Result<Processed> {
        let source = id.to_string();
        if self.feeder.contains_message(&source).or_raise(|| ErrorKind::Index)? {
            tracing::debug!("already indexed");
            self.queue.remove(id)?;
            return Ok(Processed::AlreadyIndexed);
        }

        let raw = self.queue.read(id)?;
        let mut document = distill_message(raw.as_slice()).or_raise(|| ErrorKind::Distill)?;
        let archived = self.archive.last_entry().filter(|last| last.source == source).map(|last| last.id);
        let (doc, outcome) = match archived {
            Some(doc) => (doc, Processed::Reindexed(doc)),
            None => {
                let doc = self.archive.next_id();
                self.archive.add_document_from(doc, &source, raw.as_slice()).or_raise(|| ErrorKind::Archive)?;
                (doc, Processed::Indexed(doc))
            },
        };
        tracing::Span::current().record("doc", tracing::field::display(doc));

        document.meta.insert("message".to_string(), source);
        if let Err(err) = self.index(doc, &document.meta, &document.content) {
            if let Err(rollback) = self.feeder.rollback() {
                tracing::error!(error = ?rollback, "failed to roll back index writer");
            }
            return Err(err);
        }
        self.queue.remove(id)?;
        tracing::info!(uri = document.get("uri"), "indexed message");
        Ok(outcome)
    }

    fn index(&mut self, doc: DocId, meta: &BTreeMap<String, String>, content: &str) -> Result<()> {
        self.feeder.add_document(doc.get(), meta, content).or_raise(|| ErrorKind::Index)?;
        self.feeder.commit().or_raise(|| ErrorKind::Index)
    }

    /// Keep draining until `shutdown` fires or its sender is dropped.
    ///
    /// The queue is drained on every notification and at least once per poll
    /// interval, and one last time before returning.
    pub fn run(&mut self, notify: Receiver<MessageId>, shutdown: Receiver<()>) {
        let mut notify = notify;
        loop {
            self.drain_logged();
            select! {
                recv(notify) -> message => {
                    if message.is_err() {
                        // Every recorder is gone; fall back to polling.
                        notify = never();
                    }
                },
                recv(shutdown) -> _ => break,
                default(self.poll_interval) => {},
            }
        }
        self.drain_logged();
        tracing::debug!("indexer stopped");
    }

    fn drain_logged(&mut self) {
        if let Err(err) = self.drain() {
            tracing::error!(error = ?err, "failed to drain queue");
        }
    }
}
