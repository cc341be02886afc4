//! Format registry and per-format strategy table
//!
//! Every format the service knows about is described by one `FormatEntry`:
//! display metadata for the UI, the content-type and magic-number signatures used
//! to validate uploads, and the decode/encode strategies the loader and the
//! transcode engine dispatch on. Adding a format is a new row, not a new branch.
use image::ImageFormat;
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatCategory {
    Web,
    Print,
    Vector,
    Raw,
    Document,
    System,
    Other,
}

impl fmt::Display for FormatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormatCategory::Web => "web",
            FormatCategory::Print => "print",
            FormatCategory::Vector => "vector",
            FormatCategory::Raw => "raw",
            FormatCategory::Document => "document",
            FormatCategory::System => "system",
            FormatCategory::Other => "other",
        };
        f.pad(name)
    }
}

/// How a source file of a given format is turned into pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Plain raster decode through the `image` crate.
    Generic(ImageFormat),
    /// Vector document rendered to a raster on a transparent background.
    Vector,
    /// Layered document flattened to its composite / base layer.
    LayeredDocument,
    /// ISO-BMFF still image container (HEIC/HEIF) unwrapped by an external backend.
    IsoStill,
    /// First page of a multi-page document rasterized at a fixed DPI.
    FirstPage,
    /// Proprietary camera sensor dump.
    CameraRaw,
}

/// How pixels are written out when a format is an output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStrategy {
    ProgressiveJpeg,
    Png,
    WebP,
    Avif,
    Gif,
    Bitmap,
    Tiff,
    Icon,
    /// The format can be read but never written.
    Unsupported,
}

/// Structural marker expected at the start of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// Bytes the file starts with.
    Prefix(&'static [u8]),
    /// Bytes found at a fixed offset.
    At(usize, &'static [u8]),
    /// RIFF container with the given form type.
    Riff(&'static [u8; 4]),
    /// ISO-BMFF `ftyp` box listing one of the brands (major or compatible).
    IsoBrand(&'static [&'static [u8; 4]]),
    /// Text document containing the given tag, case-insensitively.
    Markup(&'static str),
}

impl Signature {
    pub fn matches(&self, head: &[u8]) -> bool {
        match self {
            Signature::Prefix(bytes) => head.starts_with(bytes),
            Signature::At(offset, bytes) => head
                .get(*offset..offset + bytes.len())
                .map(|window| window == *bytes)
                .unwrap_or(false),
            Signature::Riff(form) => {
                head.starts_with(b"RIFF") && head.get(8..12) == Some(&form[..])
            }
            Signature::IsoBrand(brands) => iso_brands(head)
                .iter()
                .any(|brand| brands.iter().any(|b| &b[..] == *brand)),
            Signature::Markup(tag) => {
                let needle = tag.to_ascii_lowercase();
                let text = String::from_utf8_lossy(head).to_ascii_lowercase();
                text.contains(&needle)
            }
        }
    }
}

/// Major and compatible brands of a leading `ftyp` box.
fn iso_brands(head: &[u8]) -> Vec<&[u8]> {
    if head.len() < 12 || &head[4..8] != b"ftyp" {
        return Vec::new();
    }
    let box_len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
    let end = box_len.clamp(12, head.len());

    let mut brands = vec![&head[8..12]];
    // Skip minor_version (bytes 12..16); the rest are compatible brands.
    let mut offset = 16;
    while offset + 4 <= end {
        brands.push(&head[offset..offset + 4]);
        offset += 4;
    }
    brands
}

#[derive(Debug, Clone, Copy)]
pub struct FormatEntry {
    pub tag: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: FormatCategory,
    pub can_optimize: bool,
    pub can_convert_to: bool,
    pub mime_types: &'static [&'static str],
    pub signatures: &'static [Signature],
    pub decode: DecodeStrategy,
    pub encode: EncodeStrategy,
}

const JPEG_SIG: &[Signature] = &[Signature::Prefix(&[0xFF, 0xD8, 0xFF])];
const PNG_SIG: &[Signature] = &[Signature::Prefix(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])];
const GIF_SIG: &[Signature] = &[Signature::Prefix(b"GIF87a"), Signature::Prefix(b"GIF89a")];
const WEBP_SIG: &[Signature] = &[Signature::Riff(b"WEBP")];
const AVIF_SIG: &[Signature] = &[Signature::IsoBrand(&[b"avif", b"avis"])];
const BMP_SIG: &[Signature] = &[Signature::Prefix(b"BM")];
const TIFF_SIG: &[Signature] = &[Signature::Prefix(b"II*\0"), Signature::Prefix(b"MM\0*")];
const ICO_SIG: &[Signature] = &[Signature::Prefix(&[0x00, 0x00, 0x01, 0x00])];
const SVG_SIG: &[Signature] = &[Signature::Markup("<svg")];
const HEIF_SIG: &[Signature] = &[Signature::IsoBrand(&[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
])];
const PSD_SIG: &[Signature] = &[Signature::Prefix(b"8BPS")];
const PDF_SIG: &[Signature] = &[Signature::Prefix(b"%PDF-")];
const CR2_SIG: &[Signature] = &[Signature::At(8, b"CR")];
const ORF_SIG: &[Signature] = &[
    Signature::Prefix(b"IIRO"),
    Signature::Prefix(b"IIRS"),
    Signature::Prefix(b"MMOR"),
];
const TIFF_RAW_SIG: &[Signature] = &[Signature::Prefix(b"II*\0"), Signature::Prefix(b"MM\0*")];
const ANY_RAW_SIG: &[Signature] = &[
    Signature::Prefix(b"II*\0"),
    Signature::Prefix(b"MM\0*"),
    Signature::Prefix(b"IIRO"),
    Signature::Prefix(b"IIRS"),
    Signature::Prefix(b"MMOR"),
];

const JPEG_MIME: &[&str] = &["image/jpeg"];
const HEIF_MIME: &[&str] = &["image/heic", "image/heif"];
const TIFF_MIME: &[&str] = &["image/tiff"];

static REGISTRY: &[FormatEntry] = &[
    FormatEntry {
        tag: "jpg",
        name: "JPEG",
        description: "Lossy compression, good for photos",
        category: FormatCategory::Web,
        can_optimize: true,
        can_convert_to: true,
        mime_types: JPEG_MIME,
        signatures: JPEG_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Jpeg),
        encode: EncodeStrategy::ProgressiveJpeg,
    },
    FormatEntry {
        tag: "jpeg",
        name: "JPEG",
        description: "Lossy compression, good for photos",
        category: FormatCategory::Web,
        can_optimize: true,
        can_convert_to: true,
        mime_types: JPEG_MIME,
        signatures: JPEG_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Jpeg),
        encode: EncodeStrategy::ProgressiveJpeg,
    },
    FormatEntry {
        tag: "png",
        name: "PNG",
        description: "Lossless compression, supports transparency",
        category: FormatCategory::Web,
        can_optimize: true,
        can_convert_to: true,
        mime_types: &["image/png"],
        signatures: PNG_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Png),
        encode: EncodeStrategy::Png,
    },
    FormatEntry {
        tag: "gif",
        name: "GIF",
        description: "Limited colors, supports animation",
        category: FormatCategory::Web,
        can_optimize: false,
        can_convert_to: true,
        mime_types: &["image/gif"],
        signatures: GIF_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Gif),
        encode: EncodeStrategy::Gif,
    },
    FormatEntry {
        tag: "webp",
        name: "WebP",
        description: "Modern format, smaller file sizes",
        category: FormatCategory::Web,
        can_optimize: true,
        can_convert_to: true,
        mime_types: &["image/webp"],
        signatures: WEBP_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::WebP),
        encode: EncodeStrategy::WebP,
    },
    FormatEntry {
        tag: "avif",
        name: "AVIF",
        description: "Next-gen format, excellent compression",
        category: FormatCategory::Web,
        can_optimize: true,
        can_convert_to: true,
        mime_types: &["image/avif"],
        signatures: AVIF_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Avif),
        encode: EncodeStrategy::Avif,
    },
    FormatEntry {
        tag: "bmp",
        name: "Bitmap",
        description: "Uncompressed bitmap format",
        category: FormatCategory::Print,
        can_optimize: false,
        can_convert_to: true,
        mime_types: &["image/bmp", "image/x-bmp"],
        signatures: BMP_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Bmp),
        encode: EncodeStrategy::Bitmap,
    },
    FormatEntry {
        tag: "tiff",
        name: "TIFF",
        description: "High quality, print-ready format",
        category: FormatCategory::Print,
        can_optimize: true,
        can_convert_to: true,
        mime_types: TIFF_MIME,
        signatures: TIFF_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Tiff),
        encode: EncodeStrategy::Tiff,
    },
    FormatEntry {
        tag: "tif",
        name: "TIFF",
        description: "High quality, print-ready format",
        category: FormatCategory::Print,
        can_optimize: true,
        can_convert_to: false,
        mime_types: TIFF_MIME,
        signatures: TIFF_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Tiff),
        encode: EncodeStrategy::Tiff,
    },
    FormatEntry {
        tag: "ico",
        name: "Icon",
        description: "Windows icon format",
        category: FormatCategory::System,
        can_optimize: false,
        can_convert_to: true,
        mime_types: &["image/x-icon", "image/vnd.microsoft.icon"],
        signatures: ICO_SIG,
        decode: DecodeStrategy::Generic(ImageFormat::Ico),
        encode: EncodeStrategy::Icon,
    },
    FormatEntry {
        tag: "svg",
        name: "SVG",
        description: "Vector graphics format",
        category: FormatCategory::Vector,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/svg+xml"],
        signatures: SVG_SIG,
        decode: DecodeStrategy::Vector,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "heic",
        name: "HEIC",
        description: "Apple's modern image format",
        category: FormatCategory::Other,
        can_optimize: false,
        can_convert_to: false,
        mime_types: HEIF_MIME,
        signatures: HEIF_SIG,
        decode: DecodeStrategy::IsoStill,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "heif",
        name: "HEIF",
        description: "High efficiency image container",
        category: FormatCategory::Other,
        can_optimize: false,
        can_convert_to: false,
        mime_types: HEIF_MIME,
        signatures: HEIF_SIG,
        decode: DecodeStrategy::IsoStill,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "psd",
        name: "Photoshop",
        description: "Adobe Photoshop format",
        category: FormatCategory::Print,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/vnd.adobe.photoshop", "application/photoshop"],
        signatures: PSD_SIG,
        decode: DecodeStrategy::LayeredDocument,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "pdf",
        name: "PDF",
        description: "Portable document format",
        category: FormatCategory::Document,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["application/pdf"],
        signatures: PDF_SIG,
        decode: DecodeStrategy::FirstPage,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "raw",
        name: "Camera RAW",
        description: "Unprocessed camera data",
        category: FormatCategory::Raw,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/x-canon-cr2", "image/x-canon-crw"],
        signatures: ANY_RAW_SIG,
        decode: DecodeStrategy::CameraRaw,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "cr2",
        name: "Canon RAW",
        description: "Unprocessed camera data",
        category: FormatCategory::Raw,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/x-canon-cr2"],
        signatures: CR2_SIG,
        decode: DecodeStrategy::CameraRaw,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "nef",
        name: "Nikon RAW",
        description: "Unprocessed camera data",
        category: FormatCategory::Raw,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/x-nikon-nef"],
        signatures: TIFF_RAW_SIG,
        decode: DecodeStrategy::CameraRaw,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "orf",
        name: "Olympus RAW",
        description: "Unprocessed camera data",
        category: FormatCategory::Raw,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/x-olympus-orf"],
        signatures: ORF_SIG,
        decode: DecodeStrategy::CameraRaw,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "arw",
        name: "Sony RAW",
        description: "Unprocessed camera data",
        category: FormatCategory::Raw,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/x-sony-arw"],
        signatures: TIFF_RAW_SIG,
        decode: DecodeStrategy::CameraRaw,
        encode: EncodeStrategy::Unsupported,
    },
    FormatEntry {
        tag: "dng",
        name: "Adobe DNG",
        description: "Unprocessed camera data",
        category: FormatCategory::Raw,
        can_optimize: false,
        can_convert_to: false,
        mime_types: &["image/x-adobe-dng"],
        signatures: TIFF_RAW_SIG,
        decode: DecodeStrategy::CameraRaw,
        encode: EncodeStrategy::Unsupported,
    },
];

/// Every format the registry knows, in display order.
pub fn all_formats() -> &'static [FormatEntry] {
    REGISTRY
}

/// Lowercases a user supplied format name and strips a leading dot.
pub fn normalize_tag(format: &str) -> String {
    format.trim().trim_start_matches('.').to_ascii_lowercase()
}

pub fn describe(format: &str) -> Option<&'static FormatEntry> {
    let tag = normalize_tag(format);
    REGISTRY.iter().find(|entry| entry.tag == tag)
}

pub fn expected_signatures(format: &str) -> &'static [Signature] {
    describe(format).map(|entry| entry.signatures).unwrap_or(&[])
}

pub fn expected_mime_types(format: &str) -> &'static [&'static str] {
    describe(format)
        .map(|entry| entry.mime_types)
        .unwrap_or(&["application/octet-stream"])
}

/// Checks a file head against every signature registered for the format.
pub fn signature_matches(format: &str, head: &[u8]) -> bool {
    expected_signatures(format)
        .iter()
        .any(|signature| signature.matches(head))
}

/// Lowercased extension of a path, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Content type used when serving a file with the given extension.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match normalize_tag(extension).as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "tiff" | "tif" => "image/tiff",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}
