//! Gzip-compressed tar bundles of derived artifacts.
//!
//! Artifacts are grouped into folders by kind and accompanied by a plain text
//! manifest listing every file.
use crate::constants::ARCHIVE_MANIFEST_NAME;
use crate::error::Result;
use crate::formats;
use crate::utils::{format_file_size, unique_id};
use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::debug;

/// A derived artifact selected for bundling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    pub filename: String,
    pub path: PathBuf,
    /// Compressed size on disk.
    pub size: u64,
    /// Sum of the bundled artifacts' sizes.
    pub total_input_size: u64,
    pub file_count: usize,
}

impl BuiltArchive {
    /// Archive size relative to its input, in percent with one decimal.
    pub fn compression_ratio(&self) -> f64 {
        if self.total_input_size == 0 {
            return 0.0;
        }
        (self.size as f64 / self.total_input_size as f64 * 1000.0).round() / 10.0
    }
}

/// Folder an artifact lands in inside the bundle.
pub fn archive_folder(filename: &str) -> &'static str {
    match formats::extension_of(Path::new(filename)).as_deref() {
        Some("webp") => "webp",
        Some("avif") => "avif",
        Some("jpg" | "jpeg") if filename.contains("_thumb") => "thumbnails",
        _ => "optimized",
    }
}

pub fn archive_name(file_count: usize, now: DateTime<Local>) -> String {
    format!(
        "optimized_images_{}_files_{}.tar.gz",
        file_count,
        now.format("%Y-%m-%d_%H-%M-%S")
    )
}

pub fn manifest(entries: &[ArchiveEntry], generated: DateTime<Local>) -> String {
    let total: u64 = entries.iter().map(|e| e.size).sum();
    let mut text = String::new();
    let _ = writeln!(text, "Image Optimization Results");
    let _ = writeln!(text, "Generated: {}", generated.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(text, "Files: {}", entries.len());
    let _ = writeln!(text, "Total size: {}", format_file_size(total));
    let _ = writeln!(text);
    let _ = writeln!(text, "Files included:");
    for entry in entries {
        let _ = writeln!(text, "- {} ({})", entry.filename, format_file_size(entry.size));
    }
    text
}

/// Name of the bundle on disk. Carries a unique id so bundles built within
/// the same second never share a file.
fn stored_name(filename: &str) -> String {
    let stem = filename.strip_suffix(".tar.gz").unwrap_or(filename);
    format!("{}_{}.tar.gz", stem, unique_id())
}

/// Writes the bundle into `temp_dir` and returns where it went.
pub fn build_archive(
    entries: &[ArchiveEntry],
    temp_dir: &Path,
    now: DateTime<Local>,
) -> Result<BuiltArchive> {
    fs::create_dir_all(temp_dir)?;
    let filename = archive_name(entries.len(), now);
    let path = temp_dir.join(stored_name(&filename));

    let encoder = GzEncoder::new(File::create(&path)?, Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in entries {
        let name = format!("{}/{}", archive_folder(&entry.filename), entry.filename);
        debug!(archive = %filename, entry = %name, "Adding to archive");
        builder.append_path_with_name(&entry.path, &name)?;
    }

    let manifest = manifest(entries, now);
    let mut header = Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(now.timestamp().max(0) as u64);
    header.set_cksum();
    builder.append_data(&mut header, ARCHIVE_MANIFEST_NAME, manifest.as_bytes())?;

    let file = builder.into_inner()?.finish()?;
    file.sync_all()?;

    let size = fs::metadata(&path)?.len();
    Ok(BuiltArchive {
        filename,
        path,
        size,
        total_input_size: entries.iter().map(|e| e.size).sum(),
        file_count: entries.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn entry(dir: &Path, name: &str, bytes: usize) -> ArchiveEntry {
        let path = dir.join(name);
        fs::write(&path, vec![7u8; bytes]).unwrap();
        ArchiveEntry {
            filename: name.to_string(),
            path,
            size: bytes as u64,
        }
    }

    #[test]
    fn test_folder_grouping() {
        assert_eq!(archive_folder("a_1_optimized.webp"), "webp");
        assert_eq!(archive_folder("a_1_optimized.avif"), "avif");
        assert_eq!(archive_folder("a_1_thumb.jpg"), "thumbnails");
        assert_eq!(archive_folder("a_1_optimized.jpg"), "optimized");
        assert_eq!(archive_folder("a_1_converted.png"), "optimized");
    }

    #[test]
    fn test_archive_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            archive_name(3, now),
            "optimized_images_3_files_2024-03-09_14-05-07.tar.gz"
        );
    }

    #[test]
    fn test_manifest_lists_files() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let entries = vec![
            ArchiveEntry {
                filename: "a.webp".into(),
                path: PathBuf::from("a.webp"),
                size: 2048,
            },
            ArchiveEntry {
                filename: "b_thumb.jpg".into(),
                path: PathBuf::from("b_thumb.jpg"),
                size: 100,
            },
        ];
        let text = manifest(&entries, now);
        assert!(text.starts_with("Image Optimization Results\nGenerated: 2024-03-09 14:05:07\n"));
        assert!(text.contains("Files: 2\n"));
        assert!(text.contains("- a.webp (2 KB)\n"));
        assert!(text.contains("- b_thumb.jpg (100 B)\n"));
    }

    #[test]
    fn test_build_archive_layout() {
        let sources = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let entries = vec![
            entry(sources.path(), "a_1_optimized.webp", 300),
            entry(sources.path(), "b_2_optimized.webp", 200),
            entry(sources.path(), "c_3_thumb.jpg", 100),
        ];

        let built = build_archive(&entries, temp.path(), Local::now()).unwrap();
        assert_eq!(built.file_count, 3);
        assert_eq!(built.total_input_size, 600);
        assert!(built.filename.starts_with("optimized_images_3_files_"));

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&built.path).unwrap()));
        let mut names = Vec::new();
        for item in archive.entries().unwrap() {
            let mut item = item.unwrap();
            let name = item.path().unwrap().to_string_lossy().into_owned();
            if name == ARCHIVE_MANIFEST_NAME {
                let mut text = String::new();
                item.read_to_string(&mut text).unwrap();
                assert!(text.contains("Files: 3"));
            }
            names.push(name);
        }
        assert_eq!(
            names,
            vec![
                "webp/a_1_optimized.webp",
                "webp/b_2_optimized.webp",
                "thumbnails/c_3_thumb.jpg",
                "README.txt",
            ]
        );
    }

    #[test]
    fn test_same_second_archives_do_not_collide() {
        let sources = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let entries = vec![
            entry(sources.path(), "a_1_optimized.png", 4000),
            entry(sources.path(), "b_2_optimized.png", 3000),
        ];
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let first = build_archive(&entries, temp.path(), now).unwrap();
        let second = build_archive(&entries, temp.path(), now).unwrap();
        assert_eq!(first.filename, second.filename);
        assert_ne!(first.path, second.path);
        assert!(first.path.starts_with(temp.path()));

        for built in [&first, &second] {
            assert_eq!(fs::metadata(&built.path).unwrap().len(), built.size);
            let mut archive = tar::Archive::new(GzDecoder::new(File::open(&built.path).unwrap()));
            let mut sizes = Vec::new();
            for item in archive.entries().unwrap() {
                let mut item = item.unwrap();
                let mut bytes = Vec::new();
                item.read_to_end(&mut bytes).unwrap();
                sizes.push(bytes.len());
            }
            assert_eq!(&sizes[..2], &[4000, 3000]);
        }
    }
}
