use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use exn::ResultExt;

use crate::error::{ErrorKind, Result};

/// Digits in the zero-padded rendering of a [`MessageId`].
pub const MESSAGE_ID_WIDTH: usize = 12;

/// Identifies one captured message and names its log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Parse the id out of a log file name such as `000000000042.qlog`.
    pub fn from_file_name(name: &str, extension: &str) -> Option<Self> {
        let stem = name.strip_suffix(extension)?.strip_suffix('.')?;
        if stem.len() != MESSAGE_ID_WIDTH {
            return None;
        }
        stem.parse().ok()
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:0width$}", self.0, width = MESSAGE_ID_WIDTH)
    }
}

impl FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<MessageId> for u64 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Hands out increasing message ids to concurrent workers.
#[derive(Debug)]
pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageIdGenerator {
    /// Start handing out ids at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    /// Continue after the highest id found among the log files in `dirs`.
    ///
    /// Directories that don't exist yet are treated as empty.
    pub fn resume(dirs: &[&Path]) -> Result<Self> {
        let mut highest: u64 = 0;
        for dir in dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err).or_raise(|| ErrorKind::Scan(dir.to_path_buf())),
            };
            for entry in entries {
                let entry = entry.or_raise(|| ErrorKind::Scan(dir.to_path_buf()))?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(id) = [crate::MESSAGE_LOG_EXTENSION, crate::QUEUE_LOG_EXTENSION]
                    .iter()
                    .find_map(|ext| MessageId::from_file_name(name, ext))
                {
                    highest = highest.max(id.get());
                }
            }
        }
        tracing::debug!(highest, "resuming message ids");
        Ok(Self::starting_at(highest + 1))
    }

    pub fn next_id(&self) -> MessageId {
        MessageId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
