use image::{DynamicImage, GenericImageView};
use img_depot::batch::is_image_file;
use img_depot::models::ProcessingConfig;
use img_depot::processing::{fit_dimensions, resize_image, thumbnail_image};
use img_depot::server::{parse_range, ByteRange};
use img_depot::utils::{calculate_savings, sanitize_stem};
use img_depot::validation::sanitize_artifact_name;
use proptest::prelude::*;
use std::path::Path;

proptest! {
    #[test]
    fn quality_accepted_only_in_range(quality in 0u8..=255u8) {
        let result = ProcessingConfig::new(Some(quality));
        assert_eq!(result.is_ok(), (20..=100).contains(&quality));
    }

    #[test]
    fn savings_never_negative(original in 0u64..10_000_000u64, derived in 0u64..20_000_000u64) {
        let savings = calculate_savings(original, derived);
        assert!(savings >= 0.0);
        assert!(savings <= 100.0);
        if derived >= original {
            assert_eq!(savings, 0.0);
        }
    }

    #[test]
    fn fit_dimensions_never_upscales(
        width in 1u32..=8000u32,
        height in 1u32..=8000u32,
        max_width in prop::option::of(100u32..=8000u32),
        max_height in prop::option::of(100u32..=8000u32)
    ) {
        let (w, h) = fit_dimensions(width, height, max_width, max_height);
        assert!(w <= width && h <= height);
        assert!(w >= 1 && h >= 1);
        if let Some(max) = max_width {
            assert!(w <= max.max(1));
        }
        if let Some(max) = max_height {
            assert!(h <= max.max(1));
        }
    }

    #[test]
    fn fit_dimensions_keeps_aspect_ratio(
        width in 200u32..=4000u32,
        height in 200u32..=4000u32,
        max_width in 100u32..=1000u32
    ) {
        let (w, h) = fit_dimensions(width, height, Some(max_width), None);
        if (w, h) != (width, height) {
            let original = f64::from(width) / f64::from(height);
            let fitted = f64::from(w) / f64::from(h);
            // One pixel of rounding on the short side
            let tolerance = original / f64::from(h.min(w)) + 0.01;
            assert!((original - fitted).abs() <= tolerance, "{} vs {}", original, fitted);
        }
    }

    #[test]
    fn resize_noop_when_within_bounds(width in 100u32..=600u32, height in 100u32..=600u32) {
        let img = DynamicImage::new_rgb8(width, height);
        let config = ProcessingConfig::new(Some(80))
            .unwrap()
            .with_max_dimensions(Some(width), Some(height));
        assert!(resize_image(&img, &config).is_none());
    }

    #[test]
    fn range_within_bounds_or_rejected(start in 0u64..2000u64, end in 0u64..2000u64, size in 1u64..1000u64) {
        match parse_range(&format!("bytes={}-{}", start, end), size) {
            ByteRange::Partial(s, e) => {
                assert!(s <= e && e < size);
                assert_eq!((s, e), (start, end));
            }
            ByteRange::Unsatisfiable => assert!(start > end || end >= size),
            ByteRange::Full => panic!("well-formed range fell back to full"),
        }
    }

    #[test]
    fn sanitized_stem_is_download_safe(stem in "\\PC{0,40}") {
        let cleaned = sanitize_stem(&stem);
        assert!(!cleaned.is_empty());
        let name = format!("{}_0123456789abc_optimized.png", cleaned);
        assert_eq!(sanitize_artifact_name(&name).unwrap(), name);
    }

    #[test]
    fn traversal_names_rejected(prefix in "[a-z]{0,5}", name in "[a-z]{1,8}") {
        let requested = format!("{}/../{}..png", prefix, name);
        assert!(sanitize_artifact_name(&requested).is_err());
    }

    #[test]
    fn is_image_file_recognizes_extensions(
        extension in prop::sample::select(&["jpg", "jpeg", "png", "webp", "bmp", "tiff", "gif", "txt", "doc", "php"])
    ) {
        let filename = format!("test.{}", extension);
        let expected = !matches!(extension, "txt" | "doc" | "php");
        assert_eq!(is_image_file(Path::new(&filename)), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn thumbnail_is_square(width in 300u32..=700u32, height in 300u32..=700u32) {
        let thumb = thumbnail_image(&DynamicImage::new_rgb8(width, height));
        assert_eq!(thumb.dimensions(), (300, 300));
    }

    #[test]
    fn small_thumbnail_never_upscales(width in 10u32..300u32, height in 10u32..600u32) {
        let thumb = thumbnail_image(&DynamicImage::new_rgb8(width, height));
        let side = width.min(height);
        assert_eq!(thumb.dimensions(), (side, side));
    }
}
