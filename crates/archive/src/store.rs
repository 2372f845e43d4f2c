//! The archive store: append-only containers with random single-entry reads.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use exn::{OptionExt, ResultExt};
use tracing::instrument;
use trawl_compress::Compression;
use trawl_extract::read_header_block;

use crate::container::{
    CONTAINER_HEADER_LEN, EntryHeader, container_path, encode_container_header, parse_container_name,
    read_container_header,
};
use crate::error::{ErrorKind, Result};
use crate::id::DocId;

/// How new containers are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Entries a container holds before a new one is started.
    pub entries_per_container: usize,
    /// Codec for entries in newly created containers. Existing containers
    /// keep the codec recorded in their header.
    pub compression: Compression,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            entries_per_container: 1000,
            compression: Compression::default(),
        }
    }
}

/// The most recently archived document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEntry {
    pub id: DocId,
    /// The message it was archived from, empty if none was given.
    pub source: String,
}

/// One archived document, positioned on its (decompressing) payload.
pub struct ArchivedDocument {
    pub id: DocId,
    pub uri: String,
    pub source: String,
    /// Length of the raw message.
    pub raw_len: u64,
    /// CRC32 of the raw message.
    pub crc32: u32,
    reader: Box<dyn Read + Send>,
}

impl ArchivedDocument {
    /// Read the whole document and verify its checksum.
    pub fn read_verified(mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(usize::try_from(self.raw_len).unwrap_or_default());
        self.reader.read_to_end(&mut bytes).or_raise(|| ErrorKind::Checksum(self.id.get()))?;
        if bytes.len() as u64 != self.raw_len || crc32fast::hash(&bytes) != self.crc32 {
            exn::bail!(ErrorKind::Checksum(self.id.get()));
        }
        Ok(bytes)
    }
}

impl Read for ArchivedDocument {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Debug for ArchivedDocument {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ArchivedDocument")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("source", &self.source)
            .field("raw_len", &self.raw_len)
            .finish_non_exhaustive()
    }
}

/// The container currently being appended to.
#[derive(Debug)]
struct OpenContainer {
    first: DocId,
    path: PathBuf,
    file: File,
    compression: Compression,
    entries: usize,
    len: u64,
}

/// What a scan of one container found.
struct ContainerScan {
    compression: Compression,
    /// Length up to the end of the last complete entry.
    complete_len: u64,
    file_len: u64,
    entries: usize,
    last: Option<LastEntry>,
}

/// Append-only document archive.
///
/// Owned by a single writer; ids passed to [`add_document`](Self::add_document)
/// must be strictly increasing. Any number of readers may use
/// [`open_read_only`](Self::open_read_only) alongside it.
#[derive(Debug)]
pub struct ArchiveStore {
    dir: PathBuf,
    options: ArchiveOptions,
    /// Every container by first id.
    containers: BTreeMap<DocId, PathBuf>,
    current: Option<OpenContainer>,
    last: Option<LastEntry>,
    read_only: bool,
}

impl ArchiveStore {
    /// Open (or create) the archive in `dir` for writing.
    ///
    /// The newest container is scanned to recover the last id; a partially
    /// written trailing entry from an interrupted append is cut off. Only the
    /// archive's single writer may do this.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display(), containers))]
    pub fn open(dir: impl AsRef<Path>, options: ArchiveOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).or_raise(|| ErrorKind::Io(dir.clone()))?;
        let containers = Self::list_containers(&dir)?;
        tracing::Span::current().record("containers", containers.len());

        let mut store = Self::new(dir, options, containers, false);
        if let Some((&first, path)) = store.containers.last_key_value() {
            let path = path.clone();
            store.recover(first, path)?;
        }
        Ok(store)
    }

    /// Open the archive in `dir` for reading only.
    ///
    /// Nothing on disk is created, truncated or removed, so this is safe while
    /// the writer has the archive open. An entry the writer is still appending
    /// is not visible.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display(), containers))]
    pub fn open_read_only(dir: impl AsRef<Path>, options: ArchiveOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let containers = Self::list_containers(&dir)?;
        tracing::Span::current().record("containers", containers.len());

        let mut last = None;
        for path in containers.values().rev() {
            let file = match File::open(path) {
                Ok(file) => file,
                // Removed by the writer after a failed first append.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err).or_raise(|| ErrorKind::Io(path.clone())),
            };
            last = Self::scan_container(&file, path, options.compression)?.last;
            if last.is_some() {
                break;
            }
        }
        let mut store = Self::new(dir, options, containers, true);
        store.last = last;
        Ok(store)
    }

    fn new(dir: PathBuf, options: ArchiveOptions, containers: BTreeMap<DocId, PathBuf>, read_only: bool) -> Self {
        Self {
            dir,
            options: ArchiveOptions {
                entries_per_container: options.entries_per_container.max(1),
                ..options
            },
            containers,
            current: None,
            last: None,
            read_only,
        }
    }

    /// Every container in `dir` by first id. A missing directory holds none.
    fn list_containers(dir: &Path) -> Result<BTreeMap<DocId, PathBuf>> {
        let mut containers = BTreeMap::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(containers),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io(dir.to_path_buf())),
        };
        for entry in entries {
            let entry = entry.or_raise(|| ErrorKind::Io(dir.to_path_buf()))?;
            if let Some(first) = entry.file_name().to_str().and_then(parse_container_name) {
                containers.insert(first, entry.path());
            }
        }
        Ok(containers)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The most recently archived document, if any.
    pub fn last_entry(&self) -> Option<&LastEntry> {
        self.last.as_ref()
    }

    /// The id the next document should be archived under.
    pub fn next_id(&self) -> DocId {
        self.last.as_ref().map_or(DocId::FIRST, |last| last.id.next())
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Archive a message under `id`.
    pub fn add_document<R: Read>(&mut self, id: DocId, message: R) -> Result<()> {
        self.add_document_from(id, "", message)
    }

    /// Archive a message under `id`, remembering which message it came from.
    ///
    /// The message's header block provides the `uri`. The raw bytes are
    /// stored unchanged.
    #[instrument(skip_all, fields(%id, %source, size, container))]
    pub fn add_document_from<R: Read>(&mut self, id: DocId, source: &str, mut message: R) -> Result<()> {
        if self.read_only {
            exn::bail!(ErrorKind::ReadOnly(self.dir.clone()));
        }
        if let Some(last) = &self.last
            && id <= last.id
        {
            exn::bail!(ErrorKind::OutOfOrder {
                last: last.id.get(),
                given: id.get(),
            });
        }
        if source.len() > u16::MAX as usize {
            exn::bail!(ErrorKind::FieldTooLong("source"));
        }

        let mut raw = Vec::new();
        message.read_to_end(&mut raw).or_raise(|| ErrorKind::Io(self.dir.clone()))?;
        let headers = read_header_block(&mut Cursor::new(&raw)).or_raise(|| ErrorKind::Io(self.dir.clone()))?;
        let uri = headers.get("uri").unwrap_or_default();
        if uri.len() > u16::MAX as usize {
            exn::bail!(ErrorKind::FieldTooLong("uri"));
        }
        tracing::Span::current().record("size", raw.len());

        let current = self.container_for(id)?;
        let payload = current.compression.compress(&raw).map_err(ErrorKind::compression)?;
        let header = EntryHeader {
            id,
            crc32: crc32fast::hash(&raw),
            raw_len: raw.len() as u64,
            uri: uri.to_string(),
            source: source.to_string(),
            payload_len: payload.len() as u64,
        };
        let mut entry = Vec::with_capacity(header.encoded_len() as usize + payload.len());
        header.encode_into(&mut entry);
        entry.extend_from_slice(&payload);

        let appended = current.file.write_all(&entry).and_then(|()| current.file.sync_data());
        if let Err(err) = appended {
            // Cut back to the last complete entry so the container stays readable.
            if let Err(truncate) = current.file.set_len(current.len) {
                tracing::error!(path = %current.path.display(), error = %truncate, "failed to truncate container");
            }
            return Err(err).or_raise(|| ErrorKind::Io(current.path.clone()));
        }
        current.entries += 1;
        current.len += entry.len() as u64;
        tracing::Span::current().record("container", tracing::field::display(current.first));
        self.last = Some(LastEntry {
            id,
            source: source.to_string(),
        });
        Ok(())
    }

    /// Find `id` and return a reader over just that entry.
    ///
    /// Only the covering container is opened, and only entry headers are read
    /// on the way to the wanted entry. Returns `None` for ids the archive
    /// doesn't hold.
    #[instrument(skip(self), fields(%id))]
    pub fn get_document(&self, id: DocId) -> Result<Option<ArchivedDocument>> {
        let Some((_, path)) = self.containers.range(..=id).next_back() else {
            return Ok(None);
        };
        let io_error = || ErrorKind::Io(path.clone());
        let file = File::open(path).or_raise(io_error)?;
        if file.metadata().or_raise(io_error)?.len() < CONTAINER_HEADER_LEN {
            // Just created by the writer.
            return Ok(None);
        }
        let mut reader = BufReader::new(file);
        let compression = Self::read_compression(&mut reader, path)?;
        loop {
            let header = match EntryHeader::decode(&mut reader) {
                Ok(Some(header)) => header,
                Ok(None) => return Ok(None),
                // An entry the writer is still appending.
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(err) => return Err(err).or_raise(io_error),
            };
            if header.id > id {
                return Ok(None);
            }
            if header.id == id {
                let payload = reader.take(header.payload_len);
                let reader = compression.wrap_reader(payload).map_err(ErrorKind::compression)?;
                return Ok(Some(ArchivedDocument {
                    id,
                    uri: header.uri,
                    source: header.source,
                    raw_len: header.raw_len,
                    crc32: header.crc32,
                    reader,
                }));
            }
            let skip = i64::try_from(header.payload_len)
                .or_raise(|| ErrorKind::Corrupt(path.clone(), format!("payload length {}", header.payload_len)))?;
            reader.seek_relative(skip).or_raise(io_error)?;
        }
    }

    /// Read a whole document, verifying its checksum.
    pub fn read_document(&self, id: DocId) -> Result<Option<Vec<u8>>> {
        match self.get_document(id)? {
            Some(document) => document.read_verified().map(Some),
            None => Ok(None),
        }
    }

    fn read_compression<R: Read>(reader: &mut R, path: &Path) -> Result<Compression> {
        let tag = read_container_header(reader).or_raise(|| ErrorKind::Corrupt(path.to_path_buf(), "bad header".into()))?;
        Compression::from_tag(tag).map_err(ErrorKind::compression)
    }

    /// The open container `id` goes into, starting a new one when there is
    /// none or the current one is full.
    fn container_for(&mut self, id: DocId) -> Result<&mut OpenContainer> {
        if let Some(current) = &self.current
            && current.entries == 0
            && current.first != id
        {
            // Its only append failed; it would be named after an id it doesn't hold.
            fs::remove_file(&current.path).or_raise(|| ErrorKind::Io(current.path.clone()))?;
            self.containers.remove(&current.first);
            self.current = None;
        }
        let full = self
            .current
            .as_ref()
            .is_none_or(|current| current.entries >= self.options.entries_per_container);
        if full {
            let path = container_path(&self.dir, id);
            let io_error = || ErrorKind::Io(path.clone());
            let mut file = OpenOptions::new().create_new(true).append(true).open(&path).or_raise(io_error)?;
            file.write_all(&encode_container_header(self.options.compression)).or_raise(io_error)?;
            file.sync_data().or_raise(io_error)?;
            tracing::debug!(path = %path.display(), compression = %self.options.compression, "started container");
            self.containers.insert(id, path.clone());
            self.current = Some(OpenContainer {
                first: id,
                path,
                file,
                compression: self.options.compression,
                entries: 0,
                len: CONTAINER_HEADER_LEN,
            });
        }
        self.current.as_mut().ok_or_raise(|| ErrorKind::Io(self.dir.clone()))
    }

    /// Find the complete entries of one container without changing it.
    fn scan_container(file: &File, path: &Path, compression: Compression) -> Result<ContainerScan> {
        let io_error = || ErrorKind::Io(path.to_path_buf());
        let mut scan = ContainerScan {
            compression,
            complete_len: CONTAINER_HEADER_LEN,
            file_len: file.metadata().or_raise(io_error)?.len(),
            entries: 0,
            last: None,
        };
        if scan.file_len < CONTAINER_HEADER_LEN {
            return Ok(scan);
        }
        let mut reader = BufReader::new(file);
        scan.compression = Self::read_compression(&mut reader, path)?;
        loop {
            let header = match EntryHeader::decode(&mut reader) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => {
                    let at = scan.complete_len;
                    return Err(err).or_raise(|| ErrorKind::Corrupt(path.to_path_buf(), format!("entry at {at}")));
                },
            };
            let end = scan.complete_len + header.encoded_len() + header.payload_len;
            if end > scan.file_len {
                break;
            }
            reader.seek(SeekFrom::Start(end)).or_raise(io_error)?;
            scan.complete_len = end;
            scan.entries += 1;
            scan.last = Some(LastEntry {
                id: header.id,
                source: header.source,
            });
        }
        Ok(scan)
    }

    /// Scan the newest container to pick up where the last writer stopped.
    ///
    /// A container left without a single complete entry is removed, and the
    /// one before it is recovered instead.
    fn recover(&mut self, first: DocId, path: PathBuf) -> Result<()> {
        let io_error = || ErrorKind::Io(path.clone());
        let file = OpenOptions::new().read(true).append(true).open(&path).or_raise(io_error)?;
        let ContainerScan {
            compression,
            complete_len,
            file_len,
            entries,
            last,
        } = Self::scan_container(&file, &path, self.options.compression)?;

        let Some(last) = last else {
            tracing::warn!(path = %path.display(), "removing container without complete entries");
            drop(file);
            fs::remove_file(&path).or_raise(io_error)?;
            self.containers.remove(&first);
            return match self.containers.last_key_value() {
                Some((&previous, path)) => {
                    let path = path.clone();
                    self.recover(previous, path)
                },
                None => Ok(()),
            };
        };
        if complete_len < file_len {
            tracing::warn!(
                path = %path.display(),
                kept = complete_len,
                dropped = file_len - complete_len,
                "truncating incomplete trailing entry"
            );
            file.set_len(complete_len).or_raise(io_error)?;
            file.sync_data().or_raise(io_error)?;
        }
        tracing::debug!(path = %path.display(), entries, "recovered open container");
        self.last = Some(last);
        self.current = Some(OpenContainer {
            first,
            path,
            file,
            compression,
            entries,
            len: complete_len,
        });
        Ok(())
    }
}
