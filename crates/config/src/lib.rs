//! Layered configuration for trawl.
//!
//! Values are merged from, in increasing priority:
//!
//! 1. built-in defaults
//! 2. an optional config file (`.toml`, `.yaml`/`.yml` or `.json`)
//! 3. `TRAWL_`-prefixed environment variables, with `__` separating
//!    sections (`TRAWL_CAPTURE__WORKERS=4`)
//!
//! Everything on disk lives under one data directory; [`Config::path`] maps
//! the logical names the rest of the system asks for onto it.

pub mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::Display;
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use trawl_compress::Compression;

use crate::error::{ErrorKind, Result};

pub const ENV_PREFIX: &str = "TRAWL_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub capture: CaptureConfig,
    pub archive: ArchiveConfig,
    pub index: IndexConfig,
    pub indexer: IndexerConfig,
}

/// Where things are stored. Each location defaults to a directory of the
/// same name under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weblog: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = ProjectDirs::from("", "", "trawl")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".trawl"));
        Self {
            data,
            weblog: None,
            queue: None,
            archive: None,
            index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Threads capturing messages in parallel.
    pub workers: usize,
    /// Messages larger than this are dropped instead of logged.
    pub max_message_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_message_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub entries_per_container: usize,
    /// Codec for new containers; existing ones keep the codec they were
    /// created with.
    pub compression: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            entries_per_container: 1000,
            compression: Compression::default().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Memory budget handed to the index writer.
    pub writer_memory_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            writer_memory_bytes: 50_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// How often the queue is rescanned when no notification arrives.
    pub poll_interval_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 1000 }
    }
}

/// Logical storage locations.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathName {
    /// Message logs: the full captured messages.
    #[display("weblog")]
    Weblog,
    /// Queue logs: messages waiting to be indexed.
    #[display("queue")]
    Queue,
    #[display("archive")]
    Archive,
    #[display("index")]
    Index,
}

impl Config {
    /// Load defaults, then `file` if given, then the environment.
    #[tracing::instrument(skip_all, fields(file = ?file))]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = merge_file(figment, file)?;
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate a configuration from an already layered figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.workers == 0 {
            exn::bail!(ErrorKind::Invalid("capture.workers must be at least 1".to_string()));
        }
        if self.capture.max_message_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("capture.max_message_bytes must be at least 1".to_string()));
        }
        if self.archive.entries_per_container == 0 {
            exn::bail!(ErrorKind::Invalid("archive.entries_per_container must be at least 1".to_string()));
        }
        self.compression()?;
        Ok(())
    }

    /// The configured archive codec.
    pub fn compression(&self) -> Result<Compression> {
        let name = &self.archive.compression;
        name.parse::<Compression>()
            .or_raise(|| ErrorKind::Invalid(format!("unknown archive.compression {name:?}")))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.indexer.poll_interval_ms)
    }

    /// Resolve a logical location to a directory.
    pub fn path(&self, name: PathName) -> PathBuf {
        let paths = &self.paths;
        let configured = match name {
            PathName::Weblog => &paths.weblog,
            PathName::Queue => &paths.queue,
            PathName::Archive => &paths.archive,
            PathName::Index => &paths.index,
        };
        match configured {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => paths.data.join(path),
            None => paths.data.join(name.to_string()),
        }
    }
}

fn merge_file(figment: Figment, file: &Path) -> Result<Figment> {
    if !file.is_file() {
        exn::bail!(ErrorKind::NotFound(file.to_path_buf()));
    }
    let extension = file.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(file)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
        Some("json") => figment.merge(Json::file(file)),
        _ => exn::bail!(ErrorKind::Format(file.to_path_buf())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn load(file: Option<&str>) -> std::result::Result<Config, String> {
        Config::load(file.map(Path::new)).map_err(|e| format!("{e:?}"))
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.capture.workers, 10);
        assert_eq!(config.capture.max_message_bytes, 2 * 1024 * 1024);
        assert_eq!(config.archive.entries_per_container, 1000);
        assert_eq!(config.compression().unwrap(), Compression::Gzip);
        assert_eq!(config.index.writer_memory_bytes, 50_000_000);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        config.validate().unwrap();
    }

    #[rstest]
    #[case("trawl.toml", "[capture]\nworkers = 3\n")]
    #[case("trawl.yaml", "capture:\n  workers: 3\n")]
    #[case("trawl.json", r#"{"capture": {"workers": 3}}"#)]
    fn test_file_formats(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file(name, contents)?;
            let config = load(Some(name))?;
            assert_eq!(config.capture.workers, 3);
            assert_eq!(config.archive.entries_per_container, 1000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("trawl.toml", "[archive]\ncompression = \"none\"\nentries_per_container = 5\n")?;
            jail.set_env("TRAWL_ARCHIVE__COMPRESSION", "bzip2");
            jail.set_env("TRAWL_PATHS__DATA", "/srv/trawl");
            let config = load(Some("trawl.toml"))?;
            assert_eq!(config.compression().unwrap(), Compression::Bzip2);
            assert_eq!(config.archive.entries_per_container, 5);
            assert_eq!(config.path(PathName::Archive), PathBuf::from("/srv/trawl/archive"));
            Ok(())
        });
    }

    #[rstest]
    #[case::workers("[capture]\nworkers = 0\n")]
    #[case::container("[archive]\nentries_per_container = 0\n")]
    #[case::compression("[archive]\ncompression = \"lzma\"\n")]
    fn test_invalid_values(#[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file("trawl.toml", contents)?;
            let err = Config::load(Some(Path::new("trawl.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)), "{err:?}");
            Ok(())
        });
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = Config::load(Some(&missing)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));

        let ini = dir.path().join("trawl.ini");
        std::fs::write(&ini, "workers=1").unwrap();
        let err = Config::load(Some(&ini)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
    }

    #[test]
    fn test_paths_by_name() {
        let mut config = Config::default();
        config.paths.data = PathBuf::from("/data");
        config.paths.queue = Some(PathBuf::from("spool"));
        config.paths.index = Some(PathBuf::from("/fast/index"));
        assert_eq!(config.path(PathName::Weblog), PathBuf::from("/data/weblog"));
        assert_eq!(config.path(PathName::Queue), PathBuf::from("/data/spool"));
        assert_eq!(config.path(PathName::Archive), PathBuf::from("/data/archive"));
        assert_eq!(config.path(PathName::Index), PathBuf::from("/fast/index"));
    }
}
