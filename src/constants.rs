use std::time::Duration;

pub const DEFAULT_QUALITY: u8 = 80;
pub const MIN_QUALITY: u8 = 20;
pub const MAX_QUALITY: u8 = 100;

// Derivative quality policy in optimize mode
pub const WEBP_QUALITY_DROP: u8 = 5;
pub const WEBP_QUALITY_FLOOR: u8 = 60;
pub const AVIF_QUALITY_DROP: u8 = 10;
pub const AVIF_QUALITY_FLOOR: u8 = 50;
pub const AVIF_ENCODER_SPEED: u8 = 6;

pub const THUMBNAIL_SIZE: u32 = 300;
pub const THUMBNAIL_QUALITY: u8 = 85;

pub const ICON_SIZES: [u32; 6] = [16, 32, 48, 64, 128, 256];

/// PNG compression levels follow the zlib 0-9 scale.
pub const PNG_MAX_COMPRESSION_LEVEL: u8 = 9;
pub const PNG_OPTIMIZER_PRESET: u8 = 2;

pub const PDF_RENDER_DPI: u32 = 150;

pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const MAX_BATCH_SIZE: u64 = 500 * 1024 * 1024;
pub const MAX_ARCHIVE_SIZE: u64 = 100 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 20_000;

/// Bytes read from the head of a file when checking its signature.
pub const SIGNATURE_SNIFF_BYTES: usize = 64 * 1024;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const ARCHIVE_CLEANUP_DELAY: Duration = Duration::from_secs(5);

pub const UNIQUE_ID_LEN: usize = 13;

pub const UPLOADS_DIR: &str = "uploads";
pub const OPTIMIZED_DIR: &str = "optimized";
pub const TEMP_DIR: &str = "temp";

pub const DEFAULT_DOWNLOAD_PREFIX: &str = "download?file=";
pub const ARCHIVE_MANIFEST_NAME: &str = "README.txt";

/// Cache lifetime advertised for served artifacts and archives.
pub const ARTIFACT_MAX_AGE_SECS: u64 = 3600;
pub const NOT_MODIFIED_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Extensions the artifact server is willing to hand out.
pub const SERVABLE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "bmp", "tiff", "tif", "ico",
];

pub const PROGRESS_BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";
