use std::fs;
use std::io::{self, BufRead, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use exn::{OptionExt, ResultExt};
use trawl_archive::{ArchiveOptions, ArchiveStore, DocId};
use trawl_capture::{CapturedMessage, LogDirs, MessageIdGenerator, Recorded, Recorder};
use trawl_config::{Config, PathName};
use trawl_extract::{Headers, read_header_block};
use trawl_pipeline::{BackgroundIndexer, QueueLog, Trawl};
use trawl_search::{Page, SearchIndex, VersionStatus};

use crate::error::{ErrorKind, Result};

/// Links shown either side of the current page.
const PAGE_WINDOW: usize = 2;

/// How a file on disk becomes a captured message.
#[derive(Debug, Clone, Default)]
pub struct MessageSource {
    /// The file already starts with a header block.
    pub raw: bool,
    pub uri: Option<String>,
    pub content_type: Option<String>,
}

impl MessageSource {
    pub fn load(&self, path: &Path) -> Result<CapturedMessage> {
        let bytes = fs::read(path).or_raise(|| ErrorKind::Input(path.to_path_buf()))?;
        let (mut headers, body) = match self.raw {
            true => {
                let mut cursor = Cursor::new(bytes);
                let headers = read_header_block(&mut cursor).or_raise(|| ErrorKind::Input(path.to_path_buf()))?;
                let mut body = Vec::new();
                cursor.read_to_end(&mut body).or_raise(|| ErrorKind::Input(path.to_path_buf()))?;
                (headers, body)
            },
            false => (Headers::new(), bytes),
        };
        if let Some(uri) = &self.uri {
            headers.insert("uri", uri);
        } else if !headers.contains("uri") {
            let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            headers.insert("uri", format!("file://{}", absolute.display()));
        }
        if let Some(content_type) = &self.content_type {
            headers.insert("content-type", content_type);
        }
        Ok(CapturedMessage::new(headers, body))
    }
}

/// Record `files`, then index them unless `queue_only`.
pub fn capture(config: Config, files: &[PathBuf], source: &MessageSource, queue_only: bool) -> Result<()> {
    let messages = files.iter().map(|path| source.load(path)).collect::<Result<Vec<_>>>()?;
    let report = |path: &Path, recorded: Recorded| match recorded {
        Recorded::Queued(id) => println!("{}: queued as {id}", path.display()),
        Recorded::Overflowed => println!("{}: too large, skipped", path.display()),
    };

    if queue_only {
        let dirs = LogDirs::new(config.path(PathName::Weblog), config.path(PathName::Queue));
        for dir in [&dirs.messages, &dirs.queue] {
            fs::create_dir_all(dir).or_raise(|| ErrorKind::Capture)?;
        }
        let ids = MessageIdGenerator::resume(&[dirs.messages.as_path(), dirs.queue.as_path()])
            .or_raise(|| ErrorKind::Capture)?;
        let recorder = Recorder::new(dirs, config.capture.max_message_bytes, Arc::new(ids));
        for (path, message) in files.iter().zip(messages) {
            report(path, recorder.record(message).or_raise(|| ErrorKind::Capture)?);
        }
        return Ok(());
    }

    let mut trawl = Trawl::start(config).or_raise(|| ErrorKind::Pipeline)?;
    for (path, message) in files.iter().zip(messages) {
        report(path, trawl.record(message).or_raise(|| ErrorKind::Capture)?);
    }
    trawl.shutdown();
    Ok(())
}

/// Index everything waiting in the queue.
pub fn drain(config: &Config) -> Result<()> {
    let mut indexer = BackgroundIndexer::open(config).or_raise(|| ErrorKind::Pipeline)?;
    let processed = indexer.drain().or_raise(|| ErrorKind::Pipeline)?;
    println!("indexed {processed} queued message(s)");
    Ok(())
}

pub fn search(config: &Config, query: &str, start: i64, page_size: usize) -> Result<()> {
    let index = SearchIndex::open(config.path(PathName::Index)).or_raise(|| ErrorKind::Search)?;
    let page_size = page_size.max(1);
    // The total isn't known until the first search, so a start past the end
    // takes a second search on the last page.
    let requested = usize::try_from(start).unwrap_or(0);
    let mut results = index.search(query, requested, requested + page_size).or_raise(|| ErrorKind::Search)?;
    let page = Page::new(start, results.total, page_size, PAGE_WINDOW);
    if page.start != requested {
        results = index.search(query, page.start, page.end).or_raise(|| ErrorKind::Search)?;
    }

    let mut out = io::stdout().lock();
    let write = |out: &mut dyn Write| -> io::Result<()> {
        writeln!(out, "{} result(s), page {} of {}", results.total, page.page + 1, page.total_pages)?;
        for hit in &results.hits {
            let title = if hit.title.is_empty() { &hit.uri } else { &hit.title };
            writeln!(out, "\n[{}] {title} ({:.2})", DocId::new(hit.id), hit.score)?;
            writeln!(out, "    {}", hit.uri)?;
            writeln!(out, "    {}", hit.snippet)?;
        }
        if page.total_pages > 1 {
            let pages: Vec<String> = page
                .window
                .clone()
                .map(|n| match n == page.page {
                    true => format!("[{}]", n + 1),
                    false => (n + 1).to_string(),
                })
                .collect();
            writeln!(out, "\npages: {}", pages.join(" "))?;
        }
        if let Some(prev) = page.prev {
            writeln!(out, "previous: --start {prev}")?;
        }
        if let Some(next) = page.next {
            writeln!(out, "next: --start {next}")?;
        }
        Ok(())
    };
    write(&mut out).or_raise(|| ErrorKind::Output)
}

/// Write archived document `id` to stdout, byte for byte.
pub fn show(config: &Config, id: u64) -> Result<()> {
    let archive = open_archive(config)?;
    let document = archive.get_document(DocId::new(id)).or_raise(|| ErrorKind::Archive)?;
    let bytes = document
        .ok_or_raise(|| ErrorKind::NotFound(id))?
        .read_verified()
        .or_raise(|| ErrorKind::Archive)?;
    let mut out = io::stdout().lock();
    out.write_all(&bytes).and_then(|()| out.flush()).or_raise(|| ErrorKind::Output)
}

pub fn status(config: &Config) -> Result<()> {
    let archive = open_archive(config)?;
    let index = SearchIndex::open(config.path(PathName::Index)).or_raise(|| ErrorKind::Search)?;
    let pending = QueueLog::new(config.path(PathName::Queue)).pending().or_raise(|| ErrorKind::Pipeline)?;
    let version = match index.version_status().or_raise(|| ErrorKind::Search)? {
        VersionStatus::Current => "current".to_string(),
        VersionStatus::Missing => "empty".to_string(),
        VersionStatus::Mismatch(found) => format!("outdated ({found})"),
    };
    let documents = index.num_documents().or_raise(|| ErrorKind::Search)?;
    println!("queue:   {} pending", pending.len());
    println!("archive: {} container(s), next id {}", archive.container_count(), archive.next_id());
    println!("index:   {documents} document(s), schema {version}");
    Ok(())
}

/// Open the archive without recovering it; a running indexer may own it.
fn open_archive(config: &Config) -> Result<ArchiveStore> {
    let options = ArchiveOptions {
        entries_per_container: config.archive.entries_per_container,
        compression: config.compression().or_raise(|| ErrorKind::Config)?,
    };
    ArchiveStore::open_read_only(config.path(PathName::Archive), options).or_raise(|| ErrorKind::Archive)
}

/// Read a file list from stdin, one path per line.
pub fn read_file_list<R: BufRead>(reader: R) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for line in reader.lines() {
        let line = line.or_raise(|| ErrorKind::Input(PathBuf::from("-")))?;
        let line = line.trim();
        if !line.is_empty() {
            files.push(PathBuf::from(line));
        }
    }
    Ok(files)
}
