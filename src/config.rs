use crate::constants::{
    ARCHIVE_CLEANUP_DELAY, DEFAULT_DOWNLOAD_PREFIX, DEFAULT_RETENTION, MAX_ARCHIVE_SIZE,
    MAX_BATCH_SIZE, MAX_FILE_SIZE, OPTIMIZED_DIR, TEMP_DIR, UPLOADS_DIR,
};
use crate::error::{OptimizerError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_ROOT: &str = "IMG_DEPOT_ROOT";
pub const ENV_RETENTION_HOURS: &str = "IMG_DEPOT_RETENTION_HOURS";
pub const ENV_MAX_FILE_SIZE: &str = "IMG_DEPOT_MAX_FILE_SIZE";
pub const ENV_MAX_BATCH_SIZE: &str = "IMG_DEPOT_MAX_BATCH_SIZE";
pub const ENV_MAX_ARCHIVE_SIZE: &str = "IMG_DEPOT_MAX_ARCHIVE_SIZE";
pub const ENV_DOWNLOAD_PREFIX: &str = "IMG_DEPOT_DOWNLOAD_PREFIX";
pub const ENV_CLEANUP_DELAY_SECS: &str = "IMG_DEPOT_CLEANUP_DELAY_SECS";

/// Storage layout and limits of one deployment.
///
/// Three flat directories: staged uploads, derived artifacts and temporary
/// archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub uploads_dir: PathBuf,
    pub optimized_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub retention: Duration,
    pub max_file_size: u64,
    pub max_batch_size: u64,
    pub max_archive_size: u64,
    pub download_prefix: String,
    pub archive_cleanup_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::with_root(".")
    }
}

impl ServiceConfig {
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            uploads_dir: root.join(UPLOADS_DIR),
            optimized_dir: root.join(OPTIMIZED_DIR),
            temp_dir: root.join(TEMP_DIR),
            retention: DEFAULT_RETENTION,
            max_file_size: MAX_FILE_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            max_archive_size: MAX_ARCHIVE_SIZE,
            download_prefix: DEFAULT_DOWNLOAD_PREFIX.to_string(),
            archive_cleanup_delay: ARCHIVE_CLEANUP_DELAY,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unparseable values
    /// fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = lookup(ENV_ROOT).unwrap_or_else(|| ".".to_string());
        let mut config = Self::with_root(root);

        if let Some(hours) = parse_var::<u64, _>(&lookup, ENV_RETENTION_HOURS) {
            config.retention = Duration::from_secs(hours.saturating_mul(60 * 60));
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_FILE_SIZE) {
            config.max_file_size = size;
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_BATCH_SIZE) {
            config.max_batch_size = size;
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_ARCHIVE_SIZE) {
            config.max_archive_size = size;
        }
        if let Some(prefix) = lookup(ENV_DOWNLOAD_PREFIX) {
            config.download_prefix = prefix;
        }
        if let Some(secs) = parse_var(&lookup, ENV_CLEANUP_DELAY_SECS) {
            config.archive_cleanup_delay = Duration::from_secs(secs);
        }
        config
    }

    /// Moves the three directories under `root`, keeping every other setting.
    pub fn relocate(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.uploads_dir = root.join(UPLOADS_DIR);
        self.optimized_dir = root.join(OPTIMIZED_DIR);
        self.temp_dir = root.join(TEMP_DIR);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.archive_cleanup_delay = delay;
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.uploads_dir, &self.optimized_dir, &self.temp_dir] {
            fs::create_dir_all(dir)
                .map_err(|_| OptimizerError::DirectoryCreationFailed(dir.clone()))?;
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|value| value.trim().parse().ok())
}
