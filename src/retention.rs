use crate::config::ServiceConfig;
use crate::error::Result;
use crate::utils::format_file_size;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files removed per directory class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub uploads: usize,
    pub optimized: usize,
    pub temp: usize,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.uploads + self.optimized + self.temp
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    pub count: usize,
    pub size: u64,
    pub size_human: String,
}

impl DirectoryStats {
    fn new(count: usize, size: u64) -> Self {
        Self {
            count,
            size,
            size_human: format_file_size(size),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub uploads: DirectoryStats,
    pub optimized: DirectoryStats,
    pub temp: DirectoryStats,
    pub total: DirectoryStats,
}

/// Deletes artifacts older than the retention window.
///
/// Directories are scanned one level deep; subdirectories are left alone.
pub struct RetentionManager {
    uploads_dir: PathBuf,
    optimized_dir: PathBuf,
    temp_dir: PathBuf,
}

impl RetentionManager {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            uploads_dir: config.uploads_dir.clone(),
            optimized_dir: config.optimized_dir.clone(),
            temp_dir: config.temp_dir.clone(),
        }
    }

    /// Removes regular files whose mtime is older than `now - ttl`.
    pub fn purge(&self, ttl: Duration) -> Result<PurgeReport> {
        let cutoff = SystemTime::now()
            .checked_sub(ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let report = PurgeReport {
            uploads: purge_dir(&self.uploads_dir, cutoff)?,
            optimized: purge_dir(&self.optimized_dir, cutoff)?,
            temp: purge_dir(&self.temp_dir, cutoff)?,
        };
        info!(
            uploads = report.uploads,
            optimized = report.optimized,
            temp = report.temp,
            "Purged expired files"
        );
        Ok(report)
    }

    pub fn storage_stats(&self) -> Result<StorageStats> {
        let uploads = dir_stats(&self.uploads_dir)?;
        let optimized = dir_stats(&self.optimized_dir)?;
        let temp = dir_stats(&self.temp_dir)?;
        let total = DirectoryStats::new(
            uploads.count + optimized.count + temp.count,
            uploads.size + optimized.size + temp.size,
        );
        Ok(StorageStats {
            uploads,
            optimized,
            temp,
            total,
        })
    }
}

/// Regular files directly inside `dir` with their metadata. A missing
/// directory yields nothing.
fn files_in(dir: &Path) -> Result<Vec<(PathBuf, fs::Metadata)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        files.push((entry.into_path(), metadata));
    }
    Ok(files)
}

fn purge_dir(dir: &Path, cutoff: SystemTime) -> Result<usize> {
    let mut deleted = 0;
    for (path, metadata) in files_in(dir)? {
        let modified = metadata.modified()?;
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted expired file");
                deleted += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete expired file"),
        }
    }
    Ok(deleted)
}

fn dir_stats(dir: &Path) -> Result<DirectoryStats> {
    let files = files_in(dir)?;
    let size = files.iter().map(|(_, metadata)| metadata.len()).sum();
    Ok(DirectoryStats::new(files.len(), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn write_aged(path: &Path, bytes: usize, age: Duration) {
        fs::write(path, vec![0u8; bytes]).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_purge_respects_ttl() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServiceConfig::with_root(temp_dir.path());
        config.ensure_directories().unwrap();

        let old = config.optimized_dir.join("old_optimized.jpg");
        let fresh = config.optimized_dir.join("fresh_optimized.jpg");
        let old_archive = config.temp_dir.join("bundle.tar.gz");
        write_aged(&old, 10, 25 * HOUR);
        write_aged(&fresh, 10, HOUR);
        write_aged(&old_archive, 10, 48 * HOUR);

        let report = RetentionManager::new(&config).purge(24 * HOUR).unwrap();
        assert_eq!(report.optimized, 1);
        assert_eq!(report.temp, 1);
        assert_eq!(report.uploads, 0);
        assert_eq!(report.total(), 2);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_purge_is_not_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServiceConfig::with_root(temp_dir.path());
        config.ensure_directories().unwrap();

        let nested_dir = config.optimized_dir.join("keep");
        fs::create_dir(&nested_dir).unwrap();
        let nested = nested_dir.join("old.png");
        write_aged(&nested, 10, 72 * HOUR);

        let report = RetentionManager::new(&config).purge(24 * HOUR).unwrap();
        assert_eq!(report.total(), 0);
        assert!(nested.exists());
    }

    #[test]
    fn test_missing_directories_count_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServiceConfig::with_root(temp_dir.path().join("absent"));
        let manager = RetentionManager::new(&config);

        assert_eq!(manager.purge(HOUR).unwrap(), PurgeReport::default());
        assert_eq!(manager.storage_stats().unwrap().total.count, 0);
    }

    #[test]
    fn test_storage_stats() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServiceConfig::with_root(temp_dir.path());
        config.ensure_directories().unwrap();
        fs::write(config.optimized_dir.join("a.webp"), vec![0u8; 1024]).unwrap();
        fs::write(config.optimized_dir.join("b.webp"), vec![0u8; 512]).unwrap();
        fs::write(config.temp_dir.join("c.tar.gz"), vec![0u8; 100]).unwrap();

        let stats = RetentionManager::new(&config).storage_stats().unwrap();
        assert_eq!(stats.optimized.count, 2);
        assert_eq!(stats.optimized.size_human, "1.5 KB");
        assert_eq!(stats.total.count, 3);
        assert_eq!(stats.total.size, 1636);
    }
}
