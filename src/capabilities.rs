use crate::formats::{self, DecodeStrategy, EncodeStrategy, FormatEntry};
use image::ImageFormat;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

pub const MAGICK_PROGRAM: &str = "magick";
pub const PDFTOPPM_PROGRAM: &str = "pdftoppm";
pub const HEIF_CONVERT_PROGRAM: &str = "heif-convert";
pub const DCRAW_PROGRAM: &str = "dcraw";

/// Library or program that performs a decode or encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Codecs compiled into the `image` crate.
    Native,
    MozJpeg,
    LibWebp,
    Resvg,
    /// Built-in reader for the flattened composite of a layered document.
    PsdComposite,
    ImageMagick,
    Pdftoppm,
    HeifConvert,
    Dcraw,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Native => "image",
            Backend::MozJpeg => "mozjpeg",
            Backend::LibWebp => "libwebp",
            Backend::Resvg => "resvg",
            Backend::PsdComposite => "psd-composite",
            Backend::ImageMagick => MAGICK_PROGRAM,
            Backend::Pdftoppm => PDFTOPPM_PROGRAM,
            Backend::HeifConvert => HEIF_CONVERT_PROGRAM,
            Backend::Dcraw => DCRAW_PROGRAM,
        }
    }

    /// Whether the backend runs as a separate program.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Backend::ImageMagick | Backend::Pdftoppm | Backend::HeifConvert | Backend::Dcraw
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormatSupport {
    pub decode: Option<Backend>,
    pub encode: Option<Backend>,
}

impl FormatSupport {
    pub fn new(decode: Option<Backend>, encode: Option<Backend>) -> Self {
        Self { decode, encode }
    }

    pub fn read_write(backend: Backend) -> Self {
        Self::new(Some(backend), Some(backend))
    }

    pub fn is_usable(&self) -> bool {
        self.decode.is_some() || self.encode.is_some()
    }
}

/// Formats ImageMagick reports as readable and writable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MagickFormats {
    pub readable: BTreeSet<String>,
    pub writable: BTreeSet<String>,
}

impl MagickFormats {
    /// Parses the table printed by `magick -list format`.
    ///
    /// Rows look like `     JPEG* JPEG      rw-   Joint Photographic Experts Group`;
    /// the mode column holds `r`, `w` and `+` (multi-frame) flags.
    pub fn parse(listing: &str) -> Self {
        let mut formats = MagickFormats::default();
        for line in listing.lines() {
            let mut columns = line.split_whitespace();
            let (Some(name), Some(_module), Some(mode)) =
                (columns.next(), columns.next(), columns.next())
            else {
                continue;
            };
            if mode.len() != 3 || !mode.chars().all(|c| matches!(c, 'r' | 'w' | '+' | '-')) {
                continue;
            }
            let name = name.trim_end_matches('*').to_ascii_uppercase();
            if mode.starts_with('r') {
                formats.readable.insert(name.clone());
            }
            if mode.chars().nth(1) == Some('w') {
                formats.writable.insert(name);
            }
        }
        formats
    }

    pub fn reads(&self, name: &str) -> bool {
        self.readable.contains(name)
    }

    pub fn writes(&self, name: &str) -> bool {
        self.writable.contains(name)
    }
}

/// What the detector is allowed to ask of the host.
pub trait HostEnvironment {
    fn find_program(&self, name: &str) -> Option<PathBuf>;

    fn magick_formats(&self, program: &Path) -> MagickFormats;
}

/// Resolves `name` to an executable on an explicit search path.
pub fn find_program_in(name: &str, search_path: impl AsRef<OsStr>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    which::which_in(name, Some(search_path), cwd).ok()
}

/// Looks for programs on `PATH` and runs them to list their formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl HostEnvironment for SystemHost {
    fn find_program(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn magick_formats(&self, program: &Path) -> MagickFormats {
        match Command::new(program).args(["-list", "format"]).output() {
            Ok(output) if output.status.success() => {
                MagickFormats::parse(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(status = %output.status, "ImageMagick format listing failed");
                MagickFormats::default()
            }
            Err(e) => {
                debug!(error = %e, "Could not run ImageMagick");
                MagickFormats::default()
            }
        }
    }
}

/// The formats that can actually be decoded or encoded on this host.
///
/// Computed once and passed by reference into the loader and the engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FormatCapabilitySet {
    formats: BTreeMap<String, FormatSupport>,
    #[serde(skip)]
    programs: BTreeMap<Backend, PathBuf>,
}

impl FormatCapabilitySet {
    /// Inspects the running host.
    pub fn detect() -> Self {
        CapabilityDetector::new(SystemHost).detect()
    }

    /// Builds a fixed set, mostly for tests.
    pub fn from_support<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, FormatSupport)>,
        S: AsRef<str>,
    {
        let formats = entries
            .into_iter()
            .filter(|(_, support)| support.is_usable())
            .map(|(tag, support)| (formats::normalize_tag(tag.as_ref()), support))
            .collect();
        Self {
            formats,
            programs: BTreeMap::new(),
        }
    }

    pub fn with_program(mut self, backend: Backend, path: impl Into<PathBuf>) -> Self {
        self.programs.insert(backend, path.into());
        self
    }

    pub fn support(&self, format: &str) -> Option<FormatSupport> {
        self.formats.get(&formats::normalize_tag(format)).copied()
    }

    pub fn decoder(&self, format: &str) -> Option<Backend> {
        self.support(format).and_then(|s| s.decode)
    }

    pub fn encoder(&self, format: &str) -> Option<Backend> {
        self.support(format).and_then(|s| s.encode)
    }

    pub fn can_decode(&self, format: &str) -> bool {
        self.decoder(format).is_some()
    }

    pub fn can_encode(&self, format: &str) -> bool {
        self.encoder(format).is_some()
    }

    /// Format actually written when `format` is requested as an output.
    ///
    /// An icon target without an icon encoder is written as PNG instead.
    pub fn output_format(&self, format: &str) -> Option<String> {
        let tag = formats::normalize_tag(format);
        if self.can_encode(&tag) {
            return Some(tag);
        }
        let is_icon = formats::describe(&tag)
            .map(|entry| entry.encode == EncodeStrategy::Icon)
            .unwrap_or(false);
        if is_icon && self.can_encode("png") {
            Some("png".to_string())
        } else {
            None
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Location of an external program found during detection.
    pub fn program(&self, backend: Backend) -> Option<&Path> {
        self.programs.get(&backend).map(PathBuf::as_path)
    }
}

pub struct CapabilityDetector<H> {
    host: H,
}

impl<H: HostEnvironment> CapabilityDetector<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    pub fn detect(&self) -> FormatCapabilitySet {
        let mut programs = BTreeMap::new();
        for (backend, name) in [
            (Backend::ImageMagick, MAGICK_PROGRAM),
            (Backend::Pdftoppm, PDFTOPPM_PROGRAM),
            (Backend::HeifConvert, HEIF_CONVERT_PROGRAM),
            (Backend::Dcraw, DCRAW_PROGRAM),
        ] {
            if let Some(path) = self.host.find_program(name) {
                debug!(program = name, path = %path.display(), "Found external backend");
                programs.insert(backend, path);
            }
        }

        let magick = programs
            .get(&Backend::ImageMagick)
            .map(|path| self.host.magick_formats(path))
            .unwrap_or_default();

        let mut formats = BTreeMap::new();
        for entry in formats::all_formats() {
            let support = FormatSupport {
                decode: decode_backend(entry, &magick, &programs),
                encode: encode_backend(entry, &magick),
            };
            debug!(
                format = entry.tag,
                decode = support.decode.map(|b| b.name()),
                encode = support.encode.map(|b| b.name()),
                "Detected format"
            );
            if support.is_usable() {
                formats.insert(entry.tag.to_string(), support);
            }
        }

        FormatCapabilitySet { formats, programs }
    }
}

/// Name ImageMagick uses for a registry tag.
fn magick_name(tag: &str) -> String {
    match tag {
        "jpg" => "JPEG".to_string(),
        "tif" => "TIFF".to_string(),
        "raw" => "DNG".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

fn decode_backend(
    entry: &FormatEntry,
    magick: &MagickFormats,
    programs: &BTreeMap<Backend, PathBuf>,
) -> Option<Backend> {
    let magick_reads = magick.reads(&magick_name(entry.tag));
    let has = |backend: Backend| programs.contains_key(&backend);

    match entry.decode {
        DecodeStrategy::Generic(format) => {
            if format.reading_enabled() {
                Some(Backend::Native)
            } else if magick_reads {
                Some(Backend::ImageMagick)
            } else {
                None
            }
        }
        DecodeStrategy::Vector => Some(Backend::Resvg),
        DecodeStrategy::LayeredDocument => {
            if magick_reads {
                Some(Backend::ImageMagick)
            } else {
                Some(Backend::PsdComposite)
            }
        }
        DecodeStrategy::IsoStill => {
            if magick_reads {
                Some(Backend::ImageMagick)
            } else if has(Backend::HeifConvert) {
                Some(Backend::HeifConvert)
            } else {
                None
            }
        }
        DecodeStrategy::FirstPage => {
            if magick_reads {
                Some(Backend::ImageMagick)
            } else if has(Backend::Pdftoppm) {
                Some(Backend::Pdftoppm)
            } else {
                None
            }
        }
        DecodeStrategy::CameraRaw => {
            if magick_reads {
                Some(Backend::ImageMagick)
            } else if has(Backend::Dcraw) {
                Some(Backend::Dcraw)
            } else {
                None
            }
        }
    }
}

fn encode_backend(entry: &FormatEntry, magick: &MagickFormats) -> Option<Backend> {
    let native_or_magick = |format: ImageFormat| {
        if format.writing_enabled() {
            Some(Backend::Native)
        } else if magick.writes(&magick_name(entry.tag)) {
            Some(Backend::ImageMagick)
        } else {
            None
        }
    };

    match entry.encode {
        EncodeStrategy::ProgressiveJpeg => Some(Backend::MozJpeg),
        EncodeStrategy::Png => native_or_magick(ImageFormat::Png),
        EncodeStrategy::WebP => Some(Backend::LibWebp),
        EncodeStrategy::Avif => native_or_magick(ImageFormat::Avif),
        EncodeStrategy::Gif => native_or_magick(ImageFormat::Gif),
        EncodeStrategy::Bitmap => native_or_magick(ImageFormat::Bmp),
        EncodeStrategy::Tiff => native_or_magick(ImageFormat::Tiff),
        EncodeStrategy::Icon => native_or_magick(ImageFormat::Ico),
        EncodeStrategy::Unsupported => None,
    }
}
