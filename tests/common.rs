#![allow(dead_code)]

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn create_temp_directory() -> TempDir {
    TempDir::new().unwrap()
}

/// A gradient PNG large enough for recompression to matter.
pub fn create_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
    .save(&path)
    .unwrap();
    path
}

pub fn create_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, 128, (y % 256) as u8])
    })
    .save(&path)
    .unwrap();
    path
}

/// Writes a file whose extension claims an image but whose bytes do not.
pub fn create_fake_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    File::create(&path)
        .unwrap()
        .write_all(b"definitely not pixels")
        .unwrap();
    path
}

/// Two images and a text file at the top level, one more image in `subdir/`.
pub fn create_image_tree(dir: &Path) -> Vec<PathBuf> {
    let mut files = vec![
        create_png(dir, "a.png", 64, 64),
        create_jpeg(dir, "b.jpg", 64, 48),
    ];
    File::create(dir.join("notes.txt"))
        .unwrap()
        .write_all(b"not an image")
        .unwrap();

    let subdir = dir.join("subdir");
    std::fs::create_dir(&subdir).unwrap();
    files.push(create_png(&subdir, "nested.png", 32, 32));
    files
}

/// Drops a stored artifact straight into `<root>/optimized`.
pub fn store_artifact(root: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let dir = root.join("optimized");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    File::create(&path).unwrap().write_all(contents).unwrap();
    path
}
