use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use exn::ResultExt;
use tracing::instrument;
use trawl_capture::{CapturedMessage, LogDirs, MessageIdGenerator, Recorded, Recorder, WorkerPool};
use trawl_config::{Config, PathName};
use trawl_search::SearchIndex;

use crate::error::{ErrorKind, Result};
use crate::indexer::BackgroundIndexer;

/// The running capture pipeline: a worker pool recording messages and a
/// background thread indexing them.
pub struct Trawl {
    config: Config,
    pool: WorkerPool,
    recorder: Recorder,
    search: SearchIndex,
    shutdown: Option<Sender<()>>,
    indexer: Option<JoinHandle<()>>,
}

impl Trawl {
    /// Open everything `config` points at and start the workers and the
    /// indexer. Queue logs left over from a previous run are indexed first.
    #[instrument(skip_all, fields(workers = config.capture.workers))]
    pub fn start(config: Config) -> Result<Self> {
        let dirs = LogDirs::new(config.path(PathName::Weblog), config.path(PathName::Queue));
        for dir in [&dirs.messages, &dirs.queue] {
            fs::create_dir_all(dir).or_raise(|| ErrorKind::Queue(dir.clone()))?;
        }
        let ids = MessageIdGenerator::resume(&[dirs.messages.as_path(), dirs.queue.as_path()])
            .or_raise(|| ErrorKind::Capture)?;

        let mut indexer = BackgroundIndexer::open(&config)?;
        let search = indexer.search().clone();
        let (notify_tx, notify_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("trawl-indexer".to_string())
            .spawn(move || indexer.run(notify_rx, shutdown_rx))
            .or_raise(|| ErrorKind::Spawn)?;

        let recorder = Recorder::new(dirs, config.capture.max_message_bytes, Arc::new(ids)).with_notify(notify_tx);
        let pool = WorkerPool::new("trawl-capture", config.capture.workers).or_raise(|| ErrorKind::Capture)?;
        tracing::info!("trawl started");
        Ok(Self {
            config,
            pool,
            recorder,
            search,
            shutdown: Some(shutdown_tx),
            indexer: Some(handle),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read access to the index. Results reflect every message the indexer
    /// has finished with.
    pub fn search(&self) -> &SearchIndex {
        &self.search
    }

    /// Hand a message to the worker pool. Never blocks.
    pub fn capture(&self, message: CapturedMessage) -> Result<()> {
        let recorder = self.recorder.clone();
        self.pool.submit(move || recorder.record(message).map(|_| ())).or_raise(|| ErrorKind::Capture)
    }

    /// Record a message on the calling thread.
    pub fn record(&self, message: CapturedMessage) -> Result<Recorded> {
        self.recorder.record(message).or_raise(|| ErrorKind::Capture)
    }

    /// Stop the workers, then let the indexer drain the queue and exit.
    ///
    /// Captures still waiting for a worker are dropped. Calling it again does
    /// nothing.
    pub fn shutdown(&mut self) {
        let Some(indexer) = self.indexer.take() else {
            return;
        };
        self.pool.terminate();
        self.pool.join();
        drop(self.shutdown.take());
        if indexer.join().is_err() {
            tracing::error!("indexer thread panicked");
        }
        tracing::info!("trawl stopped");
    }
}

impl Drop for Trawl {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use trawl_extract::Headers;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.paths.data = dir.to_path_buf();
        config.capture.workers = 2;
        config.index.writer_memory_bytes = 20_000_000;
        config.indexer.poll_interval_ms = 50;
        config
    }

    fn message(uri: &str, body: &str) -> CapturedMessage {
        let headers: Headers = [("uri", uri)].into_iter().collect();
        CapturedMessage::new(headers, body)
    }

    #[test]
    fn test_captured_message_becomes_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let mut trawl = Trawl::start(config(dir.path())).unwrap();
        trawl.capture(message("http://example.com/", "<p>eventually consistent</p>")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(30);
        while trawl.search().search("eventually", 0, 10).unwrap().total == 0 {
            assert!(Instant::now() < deadline, "message never indexed");
            std::thread::sleep(Duration::from_millis(20));
        }
        trawl.shutdown();
        trawl.shutdown();
        assert!(dir.path().join("weblog").join("000000000001.mlog").exists());
        assert!(!dir.path().join("queue").join("000000000001.qlog").exists());
    }

    #[test]
    fn test_restart_replays_queue_and_resumes_ids() {
        let dir = tempfile::tempdir().unwrap();
        {
            // Leave a queue log behind without an indexer to consume it.
            let logs = LogDirs::new(dir.path().join("weblog"), dir.path().join("queue"));
            fs::create_dir_all(&logs.messages).unwrap();
            fs::create_dir_all(&logs.queue).unwrap();
            let recorder = Recorder::new(logs, 1024, Arc::new(MessageIdGenerator::starting_at(1)));
            recorder.record(message("http://example.com/old", "<p>left behind</p>")).unwrap();
        }

        let mut trawl = Trawl::start(config(dir.path())).unwrap();
        let recorded = trawl.record(message("http://example.com/new", "<p>fresh</p>")).unwrap();
        assert_eq!(recorded, Recorded::Queued(trawl_capture::MessageId::new(2)));
        trawl.shutdown();

        let search = SearchIndex::open(dir.path().join("index")).unwrap();
        let results = search.search("behind", 0, 10).unwrap();
        assert_eq!(results.hits[0].id, 1);
        assert_eq!(search.search("fresh", 0, 10).unwrap().hits[0].id, 2);
    }
}
