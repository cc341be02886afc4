use crate::error::{OptimizerError, Result};
use image::{DynamicImage, RgbaImage};
use resvg::{tiny_skia, usvg};
use std::path::Path;

/// Renders an SVG document at its intrinsic size on a transparent canvas.
///
/// Documents declaring a canvas larger than `max_dimension` on either side
/// are refused before the canvas is allocated.
pub fn render_svg(path: &Path, max_dimension: u32) -> Result<DynamicImage> {
    let data = std::fs::read(path)?;
    render_svg_data(&data, path.parent(), max_dimension)
}

pub fn render_svg_data(
    data: &[u8],
    resources_dir: Option<&Path>,
    max_dimension: u32,
) -> Result<DynamicImage> {
    let mut options = usvg::Options::default();
    options.resources_dir = resources_dir.map(Path::to_path_buf);

    let tree = usvg::Tree::from_data(data, &options)
        .map_err(|e| OptimizerError::Decode(format!("Failed to parse SVG: {}", e)))?;

    let size = tree.size().to_int_size();
    let (width, height) = (size.width(), size.height());
    if width > max_dimension || height > max_dimension {
        return Err(OptimizerError::InvalidDimensions(width, height, max_dimension));
    }
    let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
        OptimizerError::Decode(format!("Cannot create {}x{} SVG canvas", width, height))
    })?;

    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    // tiny-skia keeps premultiplied alpha
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        rgba.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }

    RgbaImage::from_raw(width, height, rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| OptimizerError::Decode("SVG pixmap has unexpected length".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    const LIMIT: u32 = 20_000;

    const SQUARE: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20">
  <rect x="0" y="0" width="20" height="20" fill="#ff0000"/>
</svg>"##;

    #[test]
    fn test_render_intrinsic_size_with_transparency() {
        let img = render_svg_data(SQUARE, None, LIMIT).unwrap();
        assert_eq!(img.dimensions(), (40, 20));

        let rgba = img.to_rgba8();
        assert_eq!(rgba.get_pixel(5, 5).0, [255, 0, 0, 255]);
        assert_eq!(rgba.get_pixel(35, 5).0[3], 0);
    }

    #[test]
    fn test_malformed_svg_is_decode_error() {
        let result = render_svg_data(b"<svg", None, LIMIT);
        assert!(matches!(result, Err(OptimizerError::Decode(_))));
    }

    #[test]
    fn test_oversized_canvas_rejected() {
        let huge = br#"<svg xmlns="http://www.w3.org/2000/svg" width="60000" height="60000"/>"#;
        assert!(matches!(
            render_svg_data(huge, None, LIMIT),
            Err(OptimizerError::InvalidDimensions(60000, 60000, LIMIT))
        ));
    }
}
