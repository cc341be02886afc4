use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgb, RgbImage};
use img_depot::capabilities::FormatCapabilitySet;
use img_depot::encoders::{encode_png, encode_progressive_jpeg, encode_webp};
use img_depot::loader::DecodedImage;
use img_depot::models::{Mode, ProcessingConfig};
use img_depot::processing::{resize_image, thumbnail_image, SourceInfo, TranscodeEngine};
use img_depot::server::parse_range;
use tempfile::TempDir;

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
    }))
}

enum ImageSize {
    Small,
    Medium,
    Large,
}

use ImageSize::*;

fn bench_resizing(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize");

    for size in [Small, Medium, Large].iter() {
        let (width, height) = match size {
            Small => (800, 600),
            Medium => (1920, 1080),
            Large => (3840, 2160),
        };
        let img = gradient(width, height);
        let config = ProcessingConfig::new(Some(80))
            .unwrap()
            .with_max_dimensions(Some(width / 2), Some(height / 2));

        group.bench_with_input(
            BenchmarkId::new("fit", format!("{}x{}", width, height)),
            &(img, config),
            |b, (img, config)| b.iter(|| resize_image(black_box(img), black_box(config))),
        );
    }

    group.finish();
}

fn bench_encoders(c: &mut Criterion) {
    let img = gradient(1280, 720);
    let mut group = c.benchmark_group("encode_1280x720");
    group.sample_size(10);

    group.bench_function("jpeg_q80", |b| {
        b.iter(|| encode_progressive_jpeg(black_box(&img), 80))
    });
    group.bench_function("png_q80", |b| b.iter(|| encode_png(black_box(&img), 80)));
    group.bench_function("webp_q75", |b| b.iter(|| encode_webp(black_box(&img), 75)));
    group.finish();
}

fn bench_thumbnail(c: &mut Criterion) {
    let img = gradient(1920, 1080);
    c.bench_function("thumbnail_1920x1080", |b| {
        b.iter(|| thumbnail_image(black_box(&img)))
    });
}

fn bench_transcode(c: &mut Criterion) {
    let caps = FormatCapabilitySet::detect();
    let output = TempDir::new().unwrap();
    let engine = TranscodeEngine::new(&caps, output.path());
    let img = DecodedImage::new(gradient(800, 600));
    let config = ProcessingConfig::new(Some(80))
        .unwrap()
        .with_webp(true)
        .with_thumbnail(true);

    let mut group = c.benchmark_group("transcode");
    group.sample_size(10);
    group.bench_function("optimize_jpg_webp_thumb", |b| {
        b.iter(|| {
            let source = SourceInfo::new("bench.jpg", "jpg", 500_000);
            engine.transcode(black_box(&img), &source, Mode::Optimize, &config)
        })
    });
    group.finish();
}

fn bench_parse_range(c: &mut Criterion) {
    c.bench_function("parse_range", |b| {
        b.iter(|| parse_range(black_box("bytes=1024-65535, 70000-"), black_box(1 << 20)))
    });
}

criterion_group!(
    benches,
    bench_resizing,
    bench_encoders,
    bench_thumbnail,
    bench_transcode,
    bench_parse_range
);
criterion_main!(benches);
