//! Helpers shared by the engine, the batch orchestrator and the CLI.
use crate::constants::{PROGRESS_BAR_TEMPLATE, UNIQUE_ID_LEN};
use indicatif::{ProgressBar, ProgressStyle};
use std::any::Any;
use uuid::Uuid;

const FALLBACK_STEM: &str = "image";
const MAX_STEM_LEN: usize = 100;

/// Format file size in human-readable format
///
/// Sizes are scaled by 1024 and rounded to two decimals with trailing zeros
/// dropped, e.g. "1 KB", "1.5 KB", "2.35 MB".
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    let rounded = (size * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit_index])
}

/// Calculate compression ratio as a percentage
///
/// Positive means the derived file is smaller, negative means it grew.
pub fn calculate_compression_ratio(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    ((original_size as f64 - compressed_size as f64) / original_size as f64) * 100.0
}

/// Rounds to one decimal place, halves away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Savings reported to callers: one decimal, never negative.
pub fn calculate_savings(original_size: u64, derived_size: u64) -> f64 {
    round1(calculate_compression_ratio(original_size, derived_size)).max(0.0)
}

/// Reduces an upload's stem to characters the download allow-list accepts.
pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();

    if cleaned.trim_matches('_').is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        cleaned
    }
}

/// Short random id that keeps generated filenames unique.
pub fn unique_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(UNIQUE_ID_LEN);
    id
}

/// Text of a caught panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn create_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(PROGRESS_BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1024 * 1024), "1 MB");
        assert_eq!(format_file_size(2_465_000), "2.35 MB");
        assert_eq!(format_file_size(1024 * 1024 * 1024), "1 GB");
    }

    #[test]
    fn test_calculate_compression_ratio() {
        assert_eq!(calculate_compression_ratio(1000, 800), 20.0);
        assert_eq!(calculate_compression_ratio(1000, 1200), -20.0);
        assert_eq!(calculate_compression_ratio(1000, 1000), 0.0);
        assert_eq!(calculate_compression_ratio(0, 500), 0.0);
    }

    #[test]
    fn test_savings_never_negative() {
        assert_eq!(calculate_savings(1000, 1200), 0.0);
        assert_eq!(calculate_savings(0, 10), 0.0);
        assert_eq!(calculate_savings(3000, 1000), 66.7);
        assert_eq!(calculate_savings(1000, 875), 12.5);
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("holiday photo (1)"), "holiday_photo__1_");
        assert_eq!(sanitize_stem("already-ok_name"), "already-ok_name");
        assert_eq!(sanitize_stem("日本"), "image");
        assert_eq!(sanitize_stem(""), "image");
        assert_eq!(sanitize_stem(&"a".repeat(300)).len(), MAX_STEM_LEN);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("codec blew up")).unwrap_err();
        assert_eq!(panic_message(payload), "codec blew up");
    }

    #[test]
    fn test_unique_id_shape() {
        let a = unique_id();
        let b = unique_id();
        assert_eq!(a.len(), UNIQUE_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
