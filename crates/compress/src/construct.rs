use crate::Compression;
use crate::error::{Error, ErrorKind};
use std::str::FromStr;

const TAG_NONE: u8 = 0;
const TAG_BZIP2: u8 = 1;
const TAG_GZIP: u8 = 2;
const TAG_ZSTD: u8 = 3;

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "store" => Ok(Compression::None),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            "gz" | "gzip" => Ok(Compression::Gzip),
            #[cfg(feature = "zstd")]
            "zst" | "zstd" => Ok(Compression::Zstd),
            #[cfg(not(feature = "zstd"))]
            "zst" | "zstd" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Compression {
    /// The byte written into a container header to identify this codec.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Compression::None => TAG_NONE,
            Compression::Bzip2 => TAG_BZIP2,
            Compression::Gzip => TAG_GZIP,
            #[cfg(feature = "zstd")]
            Compression::Zstd => TAG_ZSTD,
        }
    }

    /// Resolve a container header byte back into a codec.
    pub fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            TAG_NONE => Ok(Compression::None),
            TAG_BZIP2 => Ok(Compression::Bzip2),
            TAG_GZIP => Ok(Compression::Gzip),
            #[cfg(feature = "zstd")]
            TAG_ZSTD => Ok(Compression::Zstd),
            #[cfg(not(feature = "zstd"))]
            TAG_ZSTD => exn::bail!(ErrorKind::DisabledFormat("zstd".to_string())),
            other => exn::bail!(ErrorKind::UnknownTag(other)),
        }
    }
}
