//! On-disk container format.
//!
//! ```text
//! "TRAWLARC" | compression tag (u8)
//! entry*
//!
//! entry := id u64 | crc32 u32 | raw_len u64
//!        | uri_len u16 | uri | source_len u16 | source
//!        | payload_len u64 | payload
//! ```
//!
//! Integers are big-endian. The payload is the whole raw message compressed
//! on its own, so one entry can be decompressed without its neighbours. A
//! container is named after its first id: `000000001.arc`.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use trawl_compress::Compression;

use crate::id::{DOC_ID_WIDTH, DocId};

pub const CONTAINER_EXTENSION: &str = "arc";
pub(crate) const MAGIC: &[u8; 8] = b"TRAWLARC";
pub(crate) const CONTAINER_HEADER_LEN: u64 = MAGIC.len() as u64 + 1;

pub(crate) fn container_path(dir: &Path, first: DocId) -> PathBuf {
    dir.join(format!("{first}.{CONTAINER_EXTENSION}"))
}

/// The first id of the container called `name`, if it is one.
pub(crate) fn parse_container_name(name: &str) -> Option<DocId> {
    let stem = name.strip_suffix(CONTAINER_EXTENSION)?.strip_suffix('.')?;
    if stem.len() != DOC_ID_WIDTH || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

pub(crate) fn encode_container_header(compression: Compression) -> Vec<u8> {
    let mut header = MAGIC.to_vec();
    header.push(compression.tag());
    header
}

/// Reads the container header, returning the raw compression tag.
pub(crate) fn read_container_header<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut header = [0u8; CONTAINER_HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    if &header[..MAGIC.len()] != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not an archive container"));
    }
    Ok(header[MAGIC.len()])
}

/// Everything in an entry except the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub id: DocId,
    /// CRC32 of the raw (uncompressed) message.
    pub crc32: u32,
    pub raw_len: u64,
    pub uri: String,
    /// The message this document was archived from.
    pub source: String,
    pub payload_len: u64,
}

impl EntryHeader {
    /// Bytes the header takes up on disk.
    pub fn encoded_len(&self) -> u64 {
        (8 + 4 + 8 + 2 + self.uri.len() + 2 + self.source.len() + 8) as u64
    }

    /// Append the encoded header to `out`. Callers check that `uri` and
    /// `source` fit in a `u16` length.
    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.get().to_be_bytes());
        out.extend_from_slice(&self.crc32.to_be_bytes());
        out.extend_from_slice(&self.raw_len.to_be_bytes());
        for field in [&self.uri, &self.source] {
            out.extend_from_slice(&(field.len() as u16).to_be_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out.extend_from_slice(&self.payload_len.to_be_bytes());
    }

    /// Decode the next header, or `None` at a clean end of the container.
    ///
    /// End of input partway through a header is `UnexpectedEof`.
    pub(crate) fn decode<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let mut id = [0u8; 8];
        match read_up_to(reader, &mut id)? {
            0 => return Ok(None),
            8 => {},
            _ => return Err(io::ErrorKind::UnexpectedEof.into()),
        }
        let crc32 = u32::from_be_bytes(read_array(reader)?);
        let raw_len = u64::from_be_bytes(read_array(reader)?);
        let uri = read_string(reader)?;
        let source = read_string(reader)?;
        let payload_len = u64::from_be_bytes(read_array(reader)?);
        Ok(Some(Self {
            id: DocId::new(u64::from_be_bytes(id)),
            crc32,
            raw_len,
            uri,
            source,
            payload_len,
        }))
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = u16::from_be_bytes(read_array(reader)?) as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Like `read_exact`, but reports how much was read when input ends early.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
