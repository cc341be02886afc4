use crate::capabilities::{Backend, FormatCapabilitySet};
use crate::constants::{
    AVIF_ENCODER_SPEED, ICON_SIZES, PNG_MAX_COMPRESSION_LEVEL, PNG_OPTIMIZER_PRESET,
};
use crate::error::{OptimizerError, Result};
use crate::formats::EncodeStrategy;
use crate::utils::panic_message;
use image::codecs::avif::AvifEncoder;
use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageFormat};
use mozjpeg::{ColorSpace, Compress};
use oxipng::{Deflaters, Options};
use std::io::{Cursor, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;
use webp::Encoder as WebpEncoder;

/// Maps user-facing quality onto the zlib 0-9 effort scale, inversely.
///
/// quality 100 → level 0, quality 20 → level 7.
pub fn png_compression_level(quality: u8) -> u8 {
    let level = f64::from(PNG_MAX_COMPRESSION_LEVEL)
        - (f64::from(quality) / 100.0) * f64::from(PNG_MAX_COMPRESSION_LEVEL);
    level.round().clamp(0.0, f64::from(PNG_MAX_COMPRESSION_LEVEL)) as u8
}

/// Progressive JPEG through mozjpeg; quality is passed straight through.
pub fn encode_progressive_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    // libjpeg reports fatal errors by unwinding
    panic::catch_unwind(AssertUnwindSafe(|| -> std::io::Result<Vec<u8>> {
        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(width, height);
        comp.set_quality(f32::from(quality));
        comp.set_progressive_mode();

        let mut dest = Vec::new();
        let mut writer = comp.start_compress(&mut dest)?;
        writer.write_scanlines(rgb.as_raw())?;
        writer.finish()?;
        Ok(dest)
    }))
    .map_err(|payload| OptimizerError::encode("jpg", panic_message(payload)))?
    .map_err(|e| OptimizerError::encode("jpg", e))
}

/// PNG written by `image`, then recompressed with oxipng at the mapped level.
pub fn encode_png(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut png_buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_buf), ImageFormat::Png)?;

    let level = png_compression_level(quality);
    let mut options = Options::from_preset(PNG_OPTIMIZER_PRESET);
    // libdeflate accepts 1-12
    options.deflate = Deflaters::Libdeflater {
        compression: level.max(1),
    };

    debug!(quality, level, "Optimizing PNG");
    oxipng::optimize_from_memory(&png_buf, &options).map_err(|e| OptimizerError::encode("png", e))
}

/// Lossy WebP through libwebp.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let encoder = WebpEncoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder
        .encode_simple(false, f32::from(quality))
        .map_err(|e| OptimizerError::encode("webp", format!("{:?}", e)))?;
    Ok(memory.to_vec())
}

pub fn encode_avif(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = AvifEncoder::new_with_speed_quality(&mut buf, AVIF_ENCODER_SPEED, quality);
    let prepared = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };
    prepared
        .write_with_encoder(encoder)
        .map_err(|e| OptimizerError::encode("avif", e))?;
    Ok(buf)
}

/// GIF, BMP and TIFF through the `image` crate. None of them take a quality.
pub fn encode_native(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let prepared = match format {
        ImageFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ if img.color().has_alpha() => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    };

    let mut buf = Vec::new();
    prepared
        .write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| OptimizerError::encode(format!("{:?}", format).to_lowercase(), e))?;
    Ok(buf)
}

/// One ICO holding every size of the icon ladder, resampled with Lanczos3.
pub fn encode_icon(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut frames = Vec::with_capacity(ICON_SIZES.len());
    for &size in ICON_SIZES.iter() {
        let resized = img.resize_exact(size, size, FilterType::Lanczos3).to_rgba8();
        let frame = IcoFrame::as_png(resized.as_raw(), size, size, ExtendedColorType::Rgba8)
            .map_err(|e| OptimizerError::encode("ico", e))?;
        frames.push(frame);
    }

    let mut buf = Vec::new();
    IcoEncoder::new(&mut buf)
        .encode_images(&frames)
        .map_err(|e| OptimizerError::encode("ico", e))?;
    Ok(buf)
}

/// Pipes a PNG through ImageMagick to produce `tag`.
pub fn magick_encode(program: &Path, img: &DynamicImage, tag: &str, quality: u8) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let mut child = Command::new(program)
        .arg("png:-")
        .arg("-quality")
        .arg(quality.to_string())
        .arg(format!("{}:-", tag))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| OptimizerError::BackendUnavailable(format!("{}: {}", program.display(), e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&png)?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() || output.stdout.is_empty() {
        return Err(OptimizerError::encode(
            tag,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(output.stdout)
}

/// Encodes with the strategy of the target format and the backend the
/// capability set picked for it.
pub fn encode(
    img: &DynamicImage,
    tag: &str,
    strategy: EncodeStrategy,
    caps: &FormatCapabilitySet,
    quality: u8,
) -> Result<Vec<u8>> {
    let backend = caps
        .encoder(tag)
        .ok_or_else(|| OptimizerError::UnsupportedFormat(tag.to_string()))?;

    if backend == Backend::ImageMagick {
        let program = caps
            .program(backend)
            .ok_or_else(|| OptimizerError::BackendUnavailable(backend.name().to_string()))?;
        return magick_encode(program, img, tag, quality);
    }

    match strategy {
        EncodeStrategy::ProgressiveJpeg => encode_progressive_jpeg(img, quality),
        EncodeStrategy::Png => encode_png(img, quality),
        EncodeStrategy::WebP => encode_webp(img, quality),
        EncodeStrategy::Avif => encode_avif(img, quality),
        EncodeStrategy::Gif => encode_native(img, ImageFormat::Gif),
        EncodeStrategy::Bitmap => encode_native(img, ImageFormat::Bmp),
        // The TIFF encoder is lossless; quality has no effect.
        EncodeStrategy::Tiff => encode_native(img, ImageFormat::Tiff),
        EncodeStrategy::Icon => encode_icon(img),
        EncodeStrategy::Unsupported => Err(OptimizerError::UnsupportedFormat(tag.to_string())),
    }
}
