//! Sync configuration
//!
//! Built once at startup from defaults, `.env`, environment variables and CLI
//! flags, then handed to every pipeline component by reference. Components
//! never read the environment themselves.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Published directory dump (gzipped tar containing one SQLite database).
pub const DEFAULT_SOURCE_URL: &str = "https://public.podcastindex.org/podcastindex_feeds.db.tgz";

/// Local file name of the downloaded archive.
pub const DEFAULT_ARCHIVE_NAME: &str = "podcastindex_feeds.db.tgz";

/// Archive member holding the dataset. A leading `./` in the archive is ignored.
pub const DEFAULT_MEMBER_NAME: &str = "podcastindex_feeds.db";

/// Local file name of the extracted dataset.
pub const DEFAULT_DATASET_NAME: &str = "podcastindex_feeds.db";

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/feedmirror";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Four hours between sync cycles.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 4 * 60 * 60;

pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("feedmirror/", env!("CARGO_PKG_VERSION"));

/// Write buffer for the streamed download.
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: usize = 4096;

/// Copy buffer for archive extraction (1 MiB).
pub const DEFAULT_EXTRACT_CHUNK_SIZE: usize = 1024 * 1024;

/// Rows per bulk insert.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

/// Duplicate groups fetched per page while enriching.
pub const DEFAULT_ENRICH_PAGE_SIZE: usize = 500;

/// Top-level sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub paths: PathConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

/// Remote archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub download_chunk_size: usize,
}

/// Local working files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub work_dir: PathBuf,
    pub archive_name: String,
    pub member_name: String,
    pub dataset_name: String,
}

/// Document store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Stage tuning and scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub check_interval_secs: u64,
    pub extract_chunk_size: usize,
    pub load_batch_size: usize,
    pub enrich_page_size: usize,
    /// Drop the derived duplicate collection whenever records are reloaded
    pub invalidate_duplicates_on_reload: bool,
    pub show_progress: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                url: DEFAULT_SOURCE_URL.to_string(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
                connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
                download_chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            },
            paths: PathConfig {
                work_dir: std::env::temp_dir().join("feedmirror"),
                archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
                member_name: DEFAULT_MEMBER_NAME.to_string(),
                dataset_name: DEFAULT_DATASET_NAME.to_string(),
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            pipeline: PipelineConfig {
                check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
                extract_chunk_size: DEFAULT_EXTRACT_CHUNK_SIZE,
                load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
                enrich_page_size: DEFAULT_ENRICH_PAGE_SIZE,
                invalidate_duplicates_on_reload: true,
                show_progress: true,
            },
        }
    }
}

impl SyncConfig {
    /// Load configuration from `.env`, the environment and defaults
    ///
    /// Environment variables:
    /// - `FEEDMIRROR_SOURCE_URL`, `FEEDMIRROR_USER_AGENT`
    /// - `FEEDMIRROR_WORK_DIR`, `FEEDMIRROR_ARCHIVE_NAME`, `FEEDMIRROR_MEMBER_NAME`,
    ///   `FEEDMIRROR_DATASET_NAME`
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `DATABASE_CONNECT_TIMEOUT`
    /// - `FEEDMIRROR_CHECK_INTERVAL_SECS`, `FEEDMIRROR_LOAD_BATCH_SIZE`,
    ///   `FEEDMIRROR_INVALIDATE_DUPLICATES`, `FEEDMIRROR_PROGRESS`
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = std::env::var("FEEDMIRROR_SOURCE_URL") {
            config.source.url = url;
        }
        if let Ok(agent) = std::env::var("FEEDMIRROR_USER_AGENT") {
            config.source.user_agent = agent;
        }
        if let Ok(dir) = std::env::var("FEEDMIRROR_WORK_DIR") {
            config.paths.work_dir = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("FEEDMIRROR_ARCHIVE_NAME") {
            config.paths.archive_name = name;
        }
        if let Ok(name) = std::env::var("FEEDMIRROR_MEMBER_NAME") {
            config.paths.member_name = name;
        }
        if let Ok(name) = std::env::var("FEEDMIRROR_DATASET_NAME") {
            config.paths.dataset_name = name;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        config.database.max_connections =
            env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(config.database.max_connections);
        config.database.connect_timeout_secs =
            env_parse("DATABASE_CONNECT_TIMEOUT").unwrap_or(config.database.connect_timeout_secs);
        config.pipeline.check_interval_secs = env_parse("FEEDMIRROR_CHECK_INTERVAL_SECS")
            .unwrap_or(config.pipeline.check_interval_secs);
        config.pipeline.load_batch_size =
            env_parse("FEEDMIRROR_LOAD_BATCH_SIZE").unwrap_or(config.pipeline.load_batch_size);
        if let Some(flag) = env_flag("FEEDMIRROR_INVALIDATE_DUPLICATES")? {
            config.pipeline.invalidate_duplicates_on_reload = flag;
        }
        if let Some(flag) = env_flag("FEEDMIRROR_PROGRESS")? {
            config.pipeline.show_progress = flag;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.url.is_empty() {
            anyhow::bail!("Source URL cannot be empty");
        }
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }
        if self.paths.member_name.is_empty() {
            anyhow::bail!("Archive member name cannot be empty");
        }
        if self.paths.archive_name == self.paths.dataset_name {
            anyhow::bail!(
                "Archive and dataset cannot share a file name ({})",
                self.paths.archive_name
            );
        }
        if self.pipeline.check_interval_secs == 0 {
            anyhow::bail!("Check interval must be greater than 0");
        }
        if self.source.download_chunk_size == 0
            || self.pipeline.extract_chunk_size == 0
            || self.pipeline.load_batch_size == 0
            || self.pipeline.enrich_page_size == 0
        {
            anyhow::bail!("Chunk, batch and page sizes must be greater than 0");
        }
        Ok(())
    }

    pub fn work_dir(&self) -> &Path {
        &self.paths.work_dir
    }

    /// Where the downloaded archive lives
    pub fn archive_path(&self) -> PathBuf {
        self.paths.work_dir.join(&self.paths.archive_name)
    }

    /// Where the extracted SQLite dataset lives
    pub fn dataset_path(&self) -> PathBuf {
        self.paths.work_dir.join(&self.paths.dataset_name)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.check_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Boolean switch from the environment; unset is `None`, anything
/// unrecognised is an error rather than a silent default.
fn env_flag(key: &str) -> anyhow::Result<Option<bool>> {
    match std::env::var(key) {
        Ok(value) => parse_flag(&value).map(Some).ok_or_else(|| {
            anyhow::anyhow!("{} must be true/false, 1/0, yes/no or on/off, got {:?}", key, value)
        }),
        Err(_) => Ok(None),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.check_interval(), Duration::from_secs(14_400));
        assert_eq!(config.pipeline.load_batch_size, 1000);
    }

    #[test]
    fn test_paths_are_rooted_in_work_dir() {
        let mut config = SyncConfig::default();
        config.paths.work_dir = PathBuf::from("/data/feedmirror");
        assert_eq!(
            config.archive_path(),
            PathBuf::from("/data/feedmirror/podcastindex_feeds.db.tgz")
        );
        assert_eq!(config.dataset_path(), PathBuf::from("/data/feedmirror/podcastindex_feeds.db"));
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = SyncConfig::default();
        config.pipeline.load_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_colliding_file_names() {
        let mut config = SyncConfig::default();
        config.paths.dataset_name = config.paths.archive_name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_flags_accept_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert_eq!(parse_flag(value), Some(true), "{value}");
        }
        for value in ["0", "False", "no", "off"] {
            assert_eq!(parse_flag(value), Some(false), "{value}");
        }
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn test_unrecognised_flag_is_an_error() {
        std::env::set_var("FEEDMIRROR_TEST_FLAG_BAD", "sometimes");
        std::env::set_var("FEEDMIRROR_TEST_FLAG_OFF", "0");
        assert!(env_flag("FEEDMIRROR_TEST_FLAG_BAD").is_err());
        assert_eq!(env_flag("FEEDMIRROR_TEST_FLAG_OFF").unwrap(), Some(false));
        assert_eq!(env_flag("FEEDMIRROR_TEST_FLAG_UNSET").unwrap(), None);
    }
}
