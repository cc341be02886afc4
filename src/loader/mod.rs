//! Safe loading of heterogeneous sources into an editable raster.
//!
//! Order of checks: capability set, file size, structural signature, then the
//! decode strategy of the declared format. Codec panics are caught here and
//! reported as decode errors.
pub mod external;
pub mod psd;
pub mod vector;

use crate::capabilities::{Backend, FormatCapabilitySet};
use crate::constants::{MAX_FILE_SIZE, MAX_IMAGE_DIMENSION};
use crate::error::{OptimizerError, Result, ValidationError};
use crate::formats::{self, DecodeStrategy, FormatEntry};
use crate::utils::panic_message;
use crate::validation;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::debug;

/// An in-memory raster owned by the call that decoded it.
///
/// `Clone` copies the pixels.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
}

impl DecodedImage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_inner(self) -> DynamicImage {
        self.image
    }
}

impl From<DynamicImage> for DecodedImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

pub struct SafeLoader<'a> {
    caps: &'a FormatCapabilitySet,
    max_file_size: u64,
    max_dimension: u32,
}

impl<'a> SafeLoader<'a> {
    pub fn new(caps: &'a FormatCapabilitySet) -> Self {
        Self {
            caps,
            max_file_size: MAX_FILE_SIZE,
            max_dimension: MAX_IMAGE_DIMENSION,
        }
    }

    pub fn with_limits(mut self, max_file_size: u64, max_dimension: u32) -> Self {
        self.max_file_size = max_file_size;
        self.max_dimension = max_dimension;
        self
    }

    /// Loads `path` as `declared`, never trusting the declared format blindly.
    pub fn load(&self, path: &Path, declared: &str) -> Result<DecodedImage> {
        let tag = formats::normalize_tag(declared);
        let entry =
            formats::describe(&tag).ok_or_else(|| OptimizerError::UnsupportedFormat(tag.clone()))?;
        let backend = self
            .caps
            .decoder(&tag)
            .ok_or_else(|| OptimizerError::UnsupportedFormat(tag.clone()))?;

        let canonical_path = path
            .canonicalize()
            .map_err(|_| OptimizerError::FileNotFound(path.to_path_buf()))?;

        let file_size = fs::metadata(&canonical_path)?.len();
        if file_size > self.max_file_size {
            return Err(ValidationError::FileTooLarge(file_size, self.max_file_size).into());
        }

        validation::check_signature(&canonical_path, &tag)?;

        debug!(format = %tag, backend = backend.name(), path = %canonical_path.display(), "Decoding");
        let image = panic::catch_unwind(AssertUnwindSafe(|| {
            self.decode(&canonical_path, entry, backend)
        }))
        .map_err(|payload| {
            OptimizerError::Decode(format!("{} decoder panicked: {}", tag, panic_message(payload)))
        })??;

        let (width, height) = image.dimensions();
        if width > self.max_dimension || height > self.max_dimension {
            return Err(OptimizerError::InvalidDimensions(
                width,
                height,
                self.max_dimension,
            ));
        }

        Ok(DecodedImage::new(image))
    }

    fn program(&self, backend: Backend) -> Result<&Path> {
        self.caps
            .program(backend)
            .ok_or_else(|| OptimizerError::BackendUnavailable(backend.name().to_string()))
    }

    fn decode(&self, path: &Path, entry: &FormatEntry, backend: Backend) -> Result<DynamicImage> {
        match (entry.decode, backend) {
            (strategy, Backend::ImageMagick) => {
                external::magick_decode(self.program(backend)?, path, strategy)
            }
            (DecodeStrategy::Generic(format), _) => decode_generic(path, format),
            (DecodeStrategy::Vector, _) => vector::render_svg(path, self.max_dimension),
            (DecodeStrategy::LayeredDocument, _) => {
                psd::decode_composite(&fs::read(path)?, self.max_dimension)
            }
            (DecodeStrategy::IsoStill, Backend::HeifConvert) => {
                external::heif_convert_decode(self.program(backend)?, path)
            }
            (DecodeStrategy::FirstPage, Backend::Pdftoppm) => {
                external::pdftoppm_decode(self.program(backend)?, path)
            }
            (DecodeStrategy::CameraRaw, Backend::Dcraw) => {
                external::dcraw_decode(self.program(backend)?, path)
            }
            (_, other) => Err(OptimizerError::BackendUnavailable(format!(
                "{} cannot decode {}",
                other.name(),
                entry.tag
            ))),
        }
    }
}

fn decode_generic(path: &Path, format: ImageFormat) -> Result<DynamicImage> {
    let mut reader = ImageReader::open(path)?;
    reader.set_format(format);
    reader
        .decode()
        .map_err(|e| OptimizerError::Decode(format!("{:?}: {}", format, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FormatSupport;
    use image::{Rgb, RgbImage};
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn caps() -> FormatCapabilitySet {
        FormatCapabilitySet::from_support([
            ("png", FormatSupport::read_write(Backend::Native)),
            ("jpg", FormatSupport::new(Some(Backend::Native), Some(Backend::MozJpeg))),
            ("svg", FormatSupport::new(Some(Backend::Resvg), None)),
            ("psd", FormatSupport::new(Some(Backend::PsdComposite), None)),
            ("pdf", FormatSupport::new(Some(Backend::Pdftoppm), None)),
        ])
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
        img.save_with_format(&path, ImageFormat::Png).unwrap();
        path
    }

    #[test]
    fn test_load_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "a.png", 12, 8);
        let caps = caps();
        let img = SafeLoader::new(&caps).load(&path, "PNG").unwrap();
        assert_eq!(img.dimensions(), (12, 8));
    }

    #[test]
    fn test_unsupported_format_rejected_before_reading() {
        let caps = caps();
        let result = SafeLoader::new(&caps).load(Path::new("/nonexistent/a.heic"), "heic");
        assert!(matches!(result, Err(OptimizerError::UnsupportedFormat(tag)) if tag == "heic"));
    }

    #[test]
    fn test_signature_mismatch_is_validation_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "renamed.jpg", 4, 4);
        let caps = caps();
        let result = SafeLoader::new(&caps).load(&path, "jpg");
        assert!(matches!(
            result,
            Err(OptimizerError::Validation(ValidationError::SignatureMismatch(_)))
        ));
    }

    #[test]
    fn test_corrupt_body_is_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.png");
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0u8; 32]);
        File::create(&path).unwrap().write_all(&bytes).unwrap();

        let caps = caps();
        let result = SafeLoader::new(&caps).load(&path, "png");
        assert!(matches!(result, Err(OptimizerError::Decode(_))));
    }

    #[test]
    fn test_dimension_guard() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "wide.png", 64, 2);
        let caps = caps();
        let result = SafeLoader::new(&caps).with_limits(MAX_FILE_SIZE, 32).load(&path, "png");
        assert!(matches!(result, Err(OptimizerError::InvalidDimensions(64, 2, 32))));
    }

    #[test]
    fn test_file_size_guard() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_png(temp_dir.path(), "a.png", 16, 16);
        let caps = caps();
        let result = SafeLoader::new(&caps).with_limits(10, MAX_IMAGE_DIMENSION).load(&path, "png");
        assert!(matches!(
            result,
            Err(OptimizerError::Validation(ValidationError::FileTooLarge(_, 10)))
        ));
    }

    #[test]
    fn test_vector_and_layered_strategies() {
        let temp_dir = TempDir::new().unwrap();
        let caps = caps();
        let loader = SafeLoader::new(&caps);

        let svg = temp_dir.path().join("logo.svg");
        std::fs::write(
            &svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="30" height="10"><rect width="30" height="10"/></svg>"#,
        )
        .unwrap();
        assert_eq!(loader.load(&svg, "svg").unwrap().dimensions(), (30, 10));

        let psd = temp_dir.path().join("art.psd");
        let planes = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]];
        std::fs::write(&psd, psd::tests::raw_psd(3, 1, 3, &planes)).unwrap();
        assert_eq!(loader.load(&psd, "psd").unwrap().dimensions(), (3, 1));
    }

    #[test]
    fn test_oversized_declared_dimensions_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let caps = caps();
        let loader = SafeLoader::new(&caps);

        let svg = temp_dir.path().join("huge.svg");
        std::fs::write(
            &svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="60000" height="60000"/>"#,
        )
        .unwrap();
        assert!(matches!(
            loader.load(&svg, "svg"),
            Err(OptimizerError::InvalidDimensions(60000, 60000, MAX_IMAGE_DIMENSION))
        ));

        // 56-channel RLE header claiming 0xFFFFFFFF rows, no pixel data
        let psd = temp_dir.path().join("huge.psd");
        let mut header = psd::tests::raw_psd(16, u32::MAX, 1, &[]);
        header[12..14].copy_from_slice(&56u16.to_be_bytes());
        let len = header.len();
        header[len - 2..].copy_from_slice(&1u16.to_be_bytes());
        std::fs::write(&psd, &header).unwrap();
        assert!(matches!(
            loader.load(&psd, "psd"),
            Err(OptimizerError::InvalidDimensions(16, u32::MAX, MAX_IMAGE_DIMENSION))
        ));
    }

    #[test]
    fn test_missing_program_is_backend_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let pdf = temp_dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.4\n%%EOF").unwrap();

        let caps = caps();
        let result = SafeLoader::new(&caps).load(&pdf, "pdf");
        assert!(matches!(result, Err(OptimizerError::BackendUnavailable(_))));
    }

    #[test]
    fn test_clone_is_deep() {
        let original = DecodedImage::new(DynamicImage::new_rgb8(4, 4));
        let mut copy = original.clone().into_inner();
        copy = copy.resize_exact(2, 2, image::imageops::FilterType::Nearest);
        assert_eq!(original.dimensions(), (4, 4));
        assert_eq!(copy.dimensions(), (2, 2));
    }
}
