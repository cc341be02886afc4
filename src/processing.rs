use crate::capabilities::FormatCapabilitySet;
use crate::constants::{
    AVIF_QUALITY_DROP, AVIF_QUALITY_FLOOR, THUMBNAIL_QUALITY, THUMBNAIL_SIZE, WEBP_QUALITY_DROP,
    WEBP_QUALITY_FLOOR,
};
use crate::encoders;
use crate::error::{OptimizerError, Result};
use crate::formats;
use crate::loader::DecodedImage;
use crate::models::{ArtifactSuffix, DerivedArtifact, Mode, ProcessingConfig, Savings};
use crate::utils::{calculate_savings, panic_message, sanitize_stem, unique_id};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Naming and size facts about the source a set of derivatives comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Sanitized filename stem.
    pub stem: String,
    /// Shared by every derivative of one source.
    pub unique_id: String,
    pub format: String,
    pub original_size: u64,
}

impl SourceInfo {
    pub fn new(original_name: &str, format: &str, original_size: u64) -> Self {
        let stem = Path::new(original_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            stem: sanitize_stem(&stem),
            unique_id: unique_id(),
            format: formats::normalize_tag(format),
            original_size,
        }
    }

    /// `<stem>_<uniqueid>_<suffix>.<ext>`
    pub fn filename(&self, suffix: ArtifactSuffix, extension: &str) -> String {
        format!(
            "{}_{}_{}.{}",
            self.stem,
            self.unique_id,
            suffix.as_str(),
            extension
        )
    }
}

/// Largest size within the bounds that keeps the aspect ratio and never
/// exceeds the original.
pub fn fit_dimensions(
    width: u32,
    height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale_w = max_width.map_or(1.0, |m| f64::from(m) / f64::from(width));
    let scale_h = max_height.map_or(1.0, |m| f64::from(m) / f64::from(height));
    let scale = scale_w.min(scale_h).min(1.0);
    if scale >= 1.0 {
        return (width, height);
    }
    let new_width = ((f64::from(width) * scale).round() as u32).max(1);
    let new_height = ((f64::from(height) * scale).round() as u32).max(1);
    (new_width, new_height)
}

/// Applies the optimize-mode resize policy.
pub fn resize_image(img: &DynamicImage, config: &ProcessingConfig) -> Option<DynamicImage> {
    let (width, height) = img.dimensions();
    let (new_width, new_height) = fit_dimensions(width, height, config.max_width, config.max_height);
    if (new_width, new_height) == (width, height) {
        return None;
    }
    debug!(width, height, new_width, new_height, "Resizing");
    Some(img.resize_exact(new_width, new_height, FilterType::Lanczos3))
}

/// Square thumbnail: fill and center-crop to the thumbnail size. Sources
/// smaller than that are center-cropped to a square without upscaling.
pub fn thumbnail_image(img: &DynamicImage) -> DynamicImage {
    let (width, height) = img.dimensions();
    let short_side = width.min(height);
    if short_side >= THUMBNAIL_SIZE {
        img.resize_to_fill(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3)
    } else {
        let x = (width - short_side) / 2;
        let y = (height - short_side) / 2;
        img.crop_imm(x, y, short_side, short_side)
    }
}

pub fn webp_quality(quality: u8) -> u8 {
    quality.saturating_sub(WEBP_QUALITY_DROP).max(WEBP_QUALITY_FLOOR)
}

pub fn avif_quality(quality: u8) -> u8 {
    quality.saturating_sub(AVIF_QUALITY_DROP).max(AVIF_QUALITY_FLOOR)
}

/// Produces derivatives for one decoded source.
///
/// Every derivative is independent: an encode failure is logged and that
/// derivative is left out.
pub struct TranscodeEngine<'a> {
    caps: &'a FormatCapabilitySet,
    output_dir: PathBuf,
}

impl<'a> TranscodeEngine<'a> {
    pub fn new(caps: &'a FormatCapabilitySet, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let output_dir = output_dir.canonicalize().unwrap_or(output_dir);
        Self { caps, output_dir }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Runs the mode's policy, then the optional thumbnail.
    pub fn transcode(
        &self,
        img: &DecodedImage,
        source: &SourceInfo,
        mode: Mode,
        config: &ProcessingConfig,
    ) -> Vec<DerivedArtifact> {
        let mut artifacts = match mode {
            Mode::Optimize => self.optimize(img, source, config),
            Mode::Convert => self.convert(img, source, config),
        };
        if config.create_thumbnail {
            artifacts.extend(self.thumbnail(img, source));
        }
        artifacts
    }

    pub fn optimize(
        &self,
        img: &DecodedImage,
        source: &SourceInfo,
        config: &ProcessingConfig,
    ) -> Vec<DerivedArtifact> {
        let resized = resize_image(img.image(), config);
        let working = resized.as_ref().unwrap_or_else(|| img.image());

        let mut artifacts = Vec::new();
        artifacts.extend(self.derive(
            working,
            source,
            &source.format,
            config.quality,
            ArtifactSuffix::Optimized,
            false,
        ));

        if config.create_webp && source.format != "webp" {
            artifacts.extend(self.derive(
                working,
                source,
                "webp",
                webp_quality(config.quality),
                ArtifactSuffix::Optimized,
                false,
            ));
        }

        if config.create_avif && source.format != "avif" && self.caps.can_encode("avif") {
            artifacts.extend(self.derive(
                working,
                source,
                "avif",
                avif_quality(config.quality),
                ArtifactSuffix::Optimized,
                false,
            ));
        }

        artifacts
    }

    pub fn convert(
        &self,
        img: &DecodedImage,
        source: &SourceInfo,
        config: &ProcessingConfig,
    ) -> Vec<DerivedArtifact> {
        let mut artifacts: Vec<DerivedArtifact> = Vec::new();
        for target in config.resolved_targets(self.caps) {
            // ico → png substitution can collide with an explicit png target
            let written = self.caps.output_format(&target);
            if artifacts.iter().any(|a| Some(&a.format) == written.as_ref()) {
                debug!(target = %target, "Skipping duplicate output format");
                continue;
            }
            artifacts.extend(self.derive(
                img.image(),
                source,
                &target,
                config.quality,
                ArtifactSuffix::Converted,
                true,
            ));
        }
        artifacts
    }

    /// 300×300 progressive JPEG built from the full-size source.
    pub fn thumbnail(&self, img: &DecodedImage, source: &SourceInfo) -> Option<DerivedArtifact> {
        let result = catch_encode_panic("thumbnail", || {
            let thumb = thumbnail_image(img.image());
            let bytes = encoders::encode_progressive_jpeg(&thumb, THUMBNAIL_QUALITY)?;
            let filename = source.filename(ArtifactSuffix::Thumb, "jpg");
            let path = self.persist(&filename, &bytes)?;
            Ok(DerivedArtifact {
                format: "thumbnail".to_string(),
                filename,
                path,
                size: bytes.len() as u64,
                savings: Savings::Thumbnail,
                is_conversion: false,
            })
        });

        match result {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!(source = %source.stem, error = %e, "Failed to create thumbnail");
                None
            }
        }
    }

    fn derive(
        &self,
        img: &DynamicImage,
        source: &SourceInfo,
        target: &str,
        quality: u8,
        suffix: ArtifactSuffix,
        is_conversion: bool,
    ) -> Option<DerivedArtifact> {
        let result = catch_encode_panic(target, || {
            self.encode_artifact(img, source, target, quality, suffix, is_conversion)
        });

        match result {
            Ok(artifact) => {
                debug!(
                    filename = %artifact.filename,
                    size = artifact.size,
                    savings = %artifact.savings,
                    "Wrote derivative"
                );
                Some(artifact)
            }
            Err(e) => {
                warn!(source = %source.stem, target, error = %e, "Failed to save derivative");
                None
            }
        }
    }

    fn encode_artifact(
        &self,
        img: &DynamicImage,
        source: &SourceInfo,
        target: &str,
        quality: u8,
        suffix: ArtifactSuffix,
        is_conversion: bool,
    ) -> Result<DerivedArtifact> {
        let written = self
            .caps
            .output_format(target)
            .ok_or_else(|| OptimizerError::UnsupportedFormat(target.to_string()))?;
        if written != formats::normalize_tag(target) {
            warn!(requested = target, written = %written, "Encoder unavailable, substituting format");
        }
        let entry = formats::describe(&written)
            .ok_or_else(|| OptimizerError::UnsupportedFormat(written.clone()))?;

        let bytes = encoders::encode(img, &written, entry.encode, self.caps, quality)?;
        let filename = source.filename(suffix, &written);
        let path = self.persist(&filename, &bytes)?;
        let size = bytes.len() as u64;

        Ok(DerivedArtifact {
            format: written,
            filename,
            path,
            size,
            savings: Savings::Percent(calculate_savings(source.original_size, size)),
            is_conversion,
        })
    }

    /// Writes through a temp file in the output directory so a half-written
    /// artifact is never visible under its final name.
    fn persist(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.output_dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.output_dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&path).map_err(|e| OptimizerError::Io(e.error))?;
        Ok(path)
    }
}

fn catch_encode_panic<T>(target: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| OptimizerError::encode(target, panic_message(payload)))?
}
