//! Decoding through external programs found during capability detection.
//!
//! Each program writes an intermediate raster (PNG or TIFF) that is then read
//! with the `image` crate.
use crate::constants::PDF_RENDER_DPI;
use crate::error::{OptimizerError, Result};
use crate::formats::DecodeStrategy;
use image::{DynamicImage, ImageFormat};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use tracing::debug;

/// Runs a program and returns its stdout, turning failures into decode errors.
fn run(program: &Path, args: &[OsString]) -> Result<Vec<u8>> {
    debug!(program = %program.display(), ?args, "Running external decoder");
    let output = Command::new(program).args(args).output().map_err(|e| {
        OptimizerError::BackendUnavailable(format!("{}: {}", program.display(), e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OptimizerError::Decode(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }
    if output.stdout.is_empty() {
        return Err(OptimizerError::Decode(format!(
            "{} produced no image data",
            program.display()
        )));
    }
    Ok(output.stdout)
}

fn decode_bytes(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| OptimizerError::Decode(format!("Intermediate {:?} unreadable: {}", format, e)))
}

/// Arguments for ImageMagick. Only the first frame/page/layer is read, which
/// for a layered document is the flattened composite.
pub(crate) fn magick_args(input: &Path, strategy: DecodeStrategy) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if strategy == DecodeStrategy::FirstPage {
        args.push("-density".into());
        args.push(PDF_RENDER_DPI.to_string().into());
    }
    let mut source = input.as_os_str().to_os_string();
    source.push("[0]");
    args.push(source);
    args.push("png:-".into());
    args
}

pub fn magick_decode(program: &Path, input: &Path, strategy: DecodeStrategy) -> Result<DynamicImage> {
    let png = run(program, &magick_args(input, strategy))?;
    decode_bytes(&png, ImageFormat::Png)
}

pub(crate) fn pdftoppm_args(input: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-f", "1", "-l", "1", "-r"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(PDF_RENDER_DPI.to_string().into());
    args.push("-png".into());
    args.push("-singlefile".into());
    args.push(input.as_os_str().to_os_string());
    args
}

/// First page of a PDF at the fixed render DPI.
pub fn pdftoppm_decode(program: &Path, input: &Path) -> Result<DynamicImage> {
    let png = run(program, &pdftoppm_args(input))?;
    decode_bytes(&png, ImageFormat::Png)
}

/// Camera raw through dcraw, white balanced, as TIFF on stdout.
pub fn dcraw_decode(program: &Path, input: &Path) -> Result<DynamicImage> {
    let args: Vec<OsString> = vec!["-c".into(), "-w".into(), "-T".into(), input.into()];
    let tiff = run(program, &args)?;
    decode_bytes(&tiff, ImageFormat::Tiff)
}

/// Primary image of a HEIF container. heif-convert cannot write to stdout, so
/// the PNG goes through a scratch directory that is removed on return.
pub fn heif_convert_decode(program: &Path, input: &Path) -> Result<DynamicImage> {
    let scratch = TempDir::new()?;
    let target = scratch.path().join("primary.png");

    let args: Vec<OsString> = vec![input.into(), target.clone().into()];
    debug!(program = %program.display(), ?args, "Running external decoder");
    let status = Command::new(program).args(&args).output().map_err(|e| {
        OptimizerError::BackendUnavailable(format!("{}: {}", program.display(), e))
    })?;
    if !status.status.success() {
        return Err(OptimizerError::Decode(format!(
            "{} exited with {}: {}",
            program.display(),
            status.status,
            String::from_utf8_lossy(&status.stderr).trim()
        )));
    }

    let png = std::fs::read(&target).map_err(|_| {
        OptimizerError::Decode(format!("{} produced no image data", program.display()))
    })?;
    decode_bytes(&png, ImageFormat::Png)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magick_reads_first_frame_only() {
        let args = magick_args(Path::new("/in/layers.psd"), DecodeStrategy::LayeredDocument);
        assert_eq!(args, vec![OsString::from("/in/layers.psd[0]"), OsString::from("png:-")]);
    }

    #[test]
    fn test_magick_pdf_density() {
        let args = magick_args(Path::new("doc.pdf"), DecodeStrategy::FirstPage);
        assert_eq!(args[0], OsString::from("-density"));
        assert_eq!(args[1], OsString::from("150"));
        assert_eq!(args[2], OsString::from("doc.pdf[0]"));
    }

    #[test]
    fn test_pdftoppm_renders_page_one() {
        let args = pdftoppm_args(Path::new("doc.pdf"));
        let joined: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            joined,
            vec!["-f", "1", "-l", "1", "-r", "150", "-png", "-singlefile", "doc.pdf"]
        );
    }

    #[test]
    fn test_missing_program_is_backend_unavailable() {
        let result = dcraw_decode(Path::new("/nonexistent/dcraw"), Path::new("x.cr2"));
        assert!(matches!(result, Err(OptimizerError::BackendUnavailable(_))));
    }
}
