use crate::capabilities::{Backend, FormatCapabilitySet};
use crate::constants::MAX_FILE_SIZE;
use crate::error::{OptimizerError, Result};
use crate::formats::{self, FormatCategory};
use crate::loader::SafeLoader;
use crate::utils::format_file_size;
use image::{ColorType, DynamicImage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-format facts shown to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDetail {
    pub name: &'static str,
    pub description: &'static str,
    pub category: FormatCategory,
    pub mime_types: &'static [&'static str],
    /// Can be decoded and re-encoded in place.
    pub can_optimize: bool,
    /// Can be produced as a conversion target.
    pub can_convert_to: bool,
    pub decoder: Option<Backend>,
    pub encoder: Option<Backend>,
    /// Some path through this format runs a separate program.
    pub requires_external: bool,
}

/// What this host can do, grouped the way the upload page presents it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySummary {
    pub formats: Vec<String>,
    pub details: BTreeMap<String, FormatDetail>,
    pub total_supported: usize,
    pub can_optimize: Vec<String>,
    pub can_convert_to: Vec<String>,
    pub categories: BTreeMap<FormatCategory, Vec<String>>,
    pub external_programs: Vec<String>,
    pub max_file_size: String,
}

pub fn capability_summary(caps: &FormatCapabilitySet) -> CapabilitySummary {
    let mut details = BTreeMap::new();
    let mut categories: BTreeMap<FormatCategory, Vec<String>> = BTreeMap::new();

    for tag in caps.tags() {
        let Some(entry) = formats::describe(tag) else {
            continue;
        };
        let (decoder, encoder) = (caps.decoder(tag), caps.encoder(tag));
        let detail = FormatDetail {
            name: entry.name,
            description: entry.description,
            category: entry.category,
            mime_types: entry.mime_types,
            can_optimize: entry.can_optimize && caps.can_decode(tag) && caps.can_encode(tag),
            can_convert_to: entry.can_convert_to && caps.output_format(tag).is_some(),
            decoder,
            encoder,
            requires_external: decoder.into_iter().chain(encoder).any(|b| b.is_external()),
        };
        categories
            .entry(entry.category)
            .or_default()
            .push(tag.to_string());
        details.insert(tag.to_string(), detail);
    }

    let pick = |f: fn(&FormatDetail) -> bool| -> Vec<String> {
        details
            .iter()
            .filter(|(_, d)| f(d))
            .map(|(tag, _)| tag.clone())
            .collect()
    };
    let can_optimize = pick(|d| d.can_optimize);
    let can_convert_to = pick(|d| d.can_convert_to);

    let external_programs = [
        Backend::ImageMagick,
        Backend::Pdftoppm,
        Backend::HeifConvert,
        Backend::Dcraw,
    ]
    .into_iter()
    .filter(|b| caps.program(*b).is_some())
    .map(|b| b.name().to_string())
    .collect();

    CapabilitySummary {
        formats: details.keys().cloned().collect(),
        total_supported: details.len(),
        details,
        can_optimize,
        can_convert_to,
        categories,
        external_programs,
        max_file_size: format_file_size(MAX_FILE_SIZE),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub color_type: String,
    pub file_size: u64,
    pub file_size_human: String,
    pub megapixels: f64,
    pub aspect_ratio: f64,
    /// Decoded pixel buffer size in MiB.
    pub estimated_memory_mib: f64,
}

/// Decodes `path` through the safe loader and reports its properties.
pub fn image_info(path: &Path, caps: &FormatCapabilitySet) -> Result<ImageInfo> {
    if !path.exists() {
        return Err(OptimizerError::FileNotFound(path.to_path_buf()));
    }
    let format = formats::extension_of(path)
        .ok_or_else(|| OptimizerError::UnsupportedFormat(path.display().to_string()))?;
    let img = SafeLoader::new(caps).load(path, &format)?;
    let file_size = fs::metadata(path)?.len();
    let (width, height) = img.dimensions();

    Ok(ImageInfo {
        path: path.to_path_buf(),
        format: formats::normalize_tag(&format),
        width,
        height,
        color_type: format!("{:?}", img.image().color()),
        file_size,
        file_size_human: format_file_size(file_size),
        megapixels: (u64::from(width) * u64::from(height)) as f64 / 1_000_000.0,
        aspect_ratio: if height == 0 {
            0.0
        } else {
            f64::from(width) / f64::from(height)
        },
        estimated_memory_mib: estimate_memory_usage(img.image()),
    })
}

fn estimate_memory_usage(img: &DynamicImage) -> f64 {
    let bytes_per_pixel = match img.color() {
        ColorType::L8 => 1,
        ColorType::La8 | ColorType::L16 => 2,
        ColorType::Rgb8 => 3,
        ColorType::Rgba8 | ColorType::La16 => 4,
        ColorType::Rgb16 => 6,
        ColorType::Rgba16 => 8,
        ColorType::Rgb32F => 12,
        ColorType::Rgba32F => 16,
        _ => 4,
    };
    let total_bytes = u64::from(img.width()) * u64::from(img.height()) * bytes_per_pixel;
    total_bytes as f64 / (1024.0 * 1024.0)
}

/// Hints on which processing options suit the image.
pub fn suggestions(info: &ImageInfo, caps: &FormatCapabilitySet) -> Vec<String> {
    let mut hints = Vec::new();

    if info.file_size > 5 * 1024 * 1024 {
        hints.push("Large file (>5MB): consider quality 60-80".to_string());
    } else if info.file_size > 1024 * 1024 {
        hints.push("Medium file (1-5MB): consider quality 70-85".to_string());
    } else {
        hints.push("Small file (<1MB): consider quality 85-95".to_string());
    }

    if info.width > 1920 || info.height > 1080 {
        hints.push("Large dimensions: consider --max-width 1920 --max-height 1080".to_string());
    }

    match info.format.as_str() {
        "png" => hints.push("PNG: lower quality means harder recompression".to_string()),
        "jpg" | "jpeg" => hints.push("JPEG: add --webp for a smaller sibling".to_string()),
        "webp" | "avif" => hints.push("Already a modern format".to_string()),
        other => {
            if caps.can_encode("webp") {
                hints.push(format!("{}: convert to webp for web delivery", other.to_uppercase()));
            }
        }
    }
    hints
}
