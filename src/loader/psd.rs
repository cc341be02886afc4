//! Reader for the flattened composite stored at the end of a Photoshop file.
//!
//! Photoshop always writes a merged copy of the visible layers in the
//! "image data" section, so flattening a document does not require walking
//! the layer records. Supported:
//! - PSD (version 1) and PSB (version 2)
//! - Grayscale and RGB color modes, with an optional alpha channel
//! - 8 and 16 bits per channel
//! - Raw and PackBits (RLE) compression

use crate::error::{OptimizerError, Result};
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

const SIGNATURE: &[u8] = b"8BPS";
const HEADER_LEN: usize = 26;

const MODE_GRAYSCALE: u16 = 1;
const MODE_RGB: u16 = 3;

const COMPRESSION_RAW: u16 = 0;
const COMPRESSION_RLE: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    large: bool,
    channels: u16,
    height: u32,
    width: u32,
    depth: u16,
    color_mode: u16,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| truncated("section"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// Skips a length-prefixed section.
    fn skip_section(&mut self, wide: bool) -> Result<()> {
        let len = if wide {
            usize::try_from(self.u64()?).map_err(|_| truncated("section length"))?
        } else {
            self.u32()? as usize
        };
        self.take(len).map(|_| ())
    }
}

fn truncated(what: &str) -> OptimizerError {
    OptimizerError::Decode(format!("Photoshop file truncated in {}", what))
}

fn unsupported(what: String) -> OptimizerError {
    OptimizerError::Decode(format!("Unsupported Photoshop document: {}", what))
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<Header> {
    if cursor.data.len() < HEADER_LEN || cursor.take(4)? != SIGNATURE {
        return Err(OptimizerError::Decode("Missing 8BPS signature".to_string()));
    }
    let version = cursor.u16()?;
    if version != 1 && version != 2 {
        return Err(unsupported(format!("version {}", version)));
    }
    cursor.take(6)?; // reserved

    Ok(Header {
        large: version == 2,
        channels: cursor.u16()?,
        height: cursor.u32()?,
        width: cursor.u32()?,
        depth: cursor.u16()?,
        color_mode: cursor.u16()?,
    })
}

fn too_large(what: &str) -> OptimizerError {
    OptimizerError::Decode(format!("Photoshop {} does not fit in memory", what))
}

/// Decodes the merged composite of a PSD/PSB file.
///
/// Header dimensions are checked against `max_dimension` before any pixel
/// buffer is sized from them.
pub fn decode_composite(data: &[u8], max_dimension: u32) -> Result<DynamicImage> {
    let mut cursor = Cursor::new(data);
    let header = read_header(&mut cursor)?;
    if header.width > max_dimension || header.height > max_dimension {
        return Err(OptimizerError::InvalidDimensions(
            header.width,
            header.height,
            max_dimension,
        ));
    }

    let color_channels = match header.color_mode {
        MODE_GRAYSCALE => 1usize,
        MODE_RGB => 3usize,
        other => return Err(unsupported(format!("color mode {}", other))),
    };
    if header.depth != 8 && header.depth != 16 {
        return Err(unsupported(format!("{} bits per channel", header.depth)));
    }
    if (header.channels as usize) < color_channels {
        return Err(unsupported(format!("{} channels", header.channels)));
    }
    if header.width == 0 || header.height == 0 {
        return Err(OptimizerError::Decode("Photoshop document is empty".to_string()));
    }
    let has_alpha = header.channels as usize > color_channels;
    let kept_channels = color_channels + usize::from(has_alpha);

    cursor.skip_section(false)?; // color mode data
    cursor.skip_section(false)?; // image resources
    cursor.skip_section(header.large)?; // layer and mask info

    let compression = cursor.u16()?;
    let bytes_per_sample = usize::from(header.depth / 8);
    let row_len = (header.width as usize)
        .checked_mul(bytes_per_sample)
        .ok_or_else(|| too_large("row"))?;
    let rows = header.height as usize;
    let plane_len = rows.checked_mul(row_len).ok_or_else(|| too_large("plane"))?;

    let planes = match compression {
        COMPRESSION_RAW => read_raw_planes(&mut cursor, kept_channels, plane_len)?,
        COMPRESSION_RLE => read_rle_planes(
            &mut cursor,
            header.channels as usize,
            kept_channels,
            rows,
            row_len,
            plane_len,
            header.large,
        )?,
        other => return Err(unsupported(format!("compression {}", other))),
    };

    // Keep the high byte of 16-bit samples.
    let plane_samples: Vec<Vec<u8>> = planes
        .into_iter()
        .map(|plane| plane.into_iter().step_by(bytes_per_sample).collect())
        .collect();

    interleave(&header, &plane_samples, has_alpha)
}

fn read_raw_planes(
    cursor: &mut Cursor<'_>,
    kept_channels: usize,
    plane_len: usize,
) -> Result<Vec<Vec<u8>>> {
    (0..kept_channels)
        .map(|_| cursor.take(plane_len).map(<[u8]>::to_vec))
        .collect()
}

fn read_rle_planes(
    cursor: &mut Cursor<'_>,
    total_channels: usize,
    kept_channels: usize,
    rows: usize,
    row_len: usize,
    plane_len: usize,
    large: bool,
) -> Result<Vec<Vec<u8>>> {
    // The byte-count table must be present in full before it is allocated.
    let entries = total_channels
        .checked_mul(rows)
        .ok_or_else(|| too_large("RLE count table"))?;
    let entry_len = if large { 4 } else { 2 };
    let table_len = entries
        .checked_mul(entry_len)
        .ok_or_else(|| too_large("RLE count table"))?;
    if table_len > cursor.remaining() {
        return Err(truncated("RLE count table"));
    }

    let mut counts = Vec::with_capacity(entries);
    for _ in 0..entries {
        let count = if large {
            cursor.u32()? as usize
        } else {
            cursor.u16()? as usize
        };
        counts.push(count);
    }

    let mut planes = Vec::with_capacity(kept_channels);
    for channel in 0..kept_channels {
        let mut plane = Vec::with_capacity(plane_len);
        for row in 0..rows {
            let packed = cursor.take(counts[channel * rows + row])?;
            unpack_bits(packed, row_len, &mut plane)?;
        }
        planes.push(plane);
    }
    Ok(planes)
}

/// Expands one PackBits-compressed scanline of `expected` bytes into `out`.
pub(crate) fn unpack_bits(packed: &[u8], expected: usize, out: &mut Vec<u8>) -> Result<()> {
    let start = out.len();
    let mut pos = 0;

    while pos < packed.len() && out.len() - start < expected {
        let header = packed[pos] as i8;
        pos += 1;
        match header {
            -128 => {}
            0..=127 => {
                let len = header as usize + 1;
                let literal = packed.get(pos..pos + len).ok_or_else(|| truncated("RLE literal"))?;
                out.extend_from_slice(literal);
                pos += len;
            }
            _ => {
                let len = (1 - header as isize) as usize;
                let value = *packed.get(pos).ok_or_else(|| truncated("RLE run"))?;
                out.extend(std::iter::repeat(value).take(len));
                pos += 1;
            }
        }
    }

    if out.len() - start != expected {
        return Err(OptimizerError::Decode(format!(
            "RLE scanline expanded to {} bytes, expected {}",
            out.len() - start,
            expected
        )));
    }
    Ok(())
}

fn interleave(header: &Header, planes: &[Vec<u8>], has_alpha: bool) -> Result<DynamicImage> {
    let (width, height) = (header.width, header.height);
    let pixels = width as usize * height as usize;
    let channels = planes.len();

    let mut buf = Vec::with_capacity(pixels * channels);
    for i in 0..pixels {
        for plane in planes {
            buf.push(plane[i]);
        }
    }

    let bad_len = || OptimizerError::Decode("Photoshop composite has wrong size".to_string());
    let image = match (header.color_mode, has_alpha) {
        (MODE_GRAYSCALE, false) => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, buf).ok_or_else(bad_len)?)
        }
        (MODE_GRAYSCALE, true) => DynamicImage::ImageLumaA8(
            GrayAlphaImage::from_raw(width, height, buf).ok_or_else(bad_len)?,
        ),
        (_, false) => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, buf).ok_or_else(bad_len)?)
        }
        (_, true) => {
            DynamicImage::ImageRgba8(RgbaImage::from_raw(width, height, buf).ok_or_else(bad_len)?)
        }
    };
    Ok(image)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::GenericImageView;

    const LIMIT: u32 = 20_000;

    /// Builds a minimal PSD with the given planes stored raw.
    pub(crate) fn raw_psd(width: u32, height: u32, mode: u16, planes: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(SIGNATURE);
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 6]);
        data.extend_from_slice(&(planes.len() as u16).to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&8u16.to_be_bytes());
        data.extend_from_slice(&mode.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&COMPRESSION_RAW.to_be_bytes());
        for plane in planes {
            data.extend_from_slice(plane);
        }
        data
    }

    #[test]
    fn test_raw_rgb_composite() {
        let planes = vec![vec![255, 0], vec![0, 255], vec![10, 20]];
        let img = decode_composite(&raw_psd(2, 1, MODE_RGB, &planes), LIMIT).unwrap();
        assert_eq!(img.dimensions(), (2, 1));
        let rgb = img.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 10]);
        assert_eq!(rgb.get_pixel(1, 0).0, [0, 255, 20]);
    }

    #[test]
    fn test_extra_channel_becomes_alpha() {
        let planes = vec![vec![1], vec![2], vec![3], vec![128]];
        let img = decode_composite(&raw_psd(1, 1, MODE_RGB, &planes), LIMIT).unwrap();
        assert_eq!(img.to_rgba8().get_pixel(0, 0).0, [1, 2, 3, 128]);
    }

    #[test]
    fn test_rle_grayscale_composite() {
        let mut data = raw_psd(4, 1, MODE_GRAYSCALE, &[]);
        // Replace header channel count and the trailing compression marker.
        data[12..14].copy_from_slice(&1u16.to_be_bytes());
        let len = data.len();
        data[len - 2..].copy_from_slice(&COMPRESSION_RLE.to_be_bytes());
        // One row: run of three 7s then a literal 9
        let row = [0xFEu8, 7, 0x00, 9];
        data.extend_from_slice(&(row.len() as u16).to_be_bytes());
        data.extend_from_slice(&row);

        let img = decode_composite(&data, LIMIT).unwrap();
        assert_eq!(img.to_luma8().into_raw(), vec![7, 7, 7, 9]);
    }

    #[test]
    fn test_unpack_bits_rejects_short_rows() {
        let mut out = Vec::new();
        assert!(unpack_bits(&[0x01, 5], 4, &mut out).is_err());
    }

    #[test]
    fn test_truncated_and_unsupported() {
        assert!(decode_composite(b"8BPS", LIMIT).is_err());
        let planes = vec![vec![0u8; 4]];
        let mut cmyk = raw_psd(2, 2, 4, &planes);
        cmyk[12..14].copy_from_slice(&4u16.to_be_bytes());
        assert!(matches!(
            decode_composite(&cmyk, LIMIT),
            Err(OptimizerError::Decode(msg)) if msg.contains("color mode 4")
        ));
    }

    /// Header only: RLE grayscale with the given geometry and no pixel data.
    fn rle_header(width: u32, height: u32, channels: u16) -> Vec<u8> {
        let mut data = raw_psd(width, height, MODE_GRAYSCALE, &[]);
        data[12..14].copy_from_slice(&channels.to_be_bytes());
        let len = data.len();
        data[len - 2..].copy_from_slice(&COMPRESSION_RLE.to_be_bytes());
        data
    }

    #[test]
    fn test_oversized_header_rejected_before_allocation() {
        let data = rle_header(16, u32::MAX, 56);
        assert!(data.len() < 128);
        assert!(matches!(
            decode_composite(&data, LIMIT),
            Err(OptimizerError::InvalidDimensions(16, u32::MAX, LIMIT))
        ));
    }

    #[test]
    fn test_missing_rle_table_is_truncation() {
        // Within the dimension limit, but the count table is absent
        let data = rle_header(LIMIT, LIMIT, 56);
        assert!(matches!(
            decode_composite(&data, LIMIT),
            Err(OptimizerError::Decode(msg)) if msg.contains("RLE count table")
        ));
    }
}
