//! Label slice encoding.
//!
//! One z slice of a [`Segmentation`] becomes one 2D image, `x` along the
//! image width and `y` along its height. Two encodings are offered:
//!
//! - [`LabelEncoding::Gray16`]: one 16-bit gray channel holding the label.
//!   Fails for labels above `u16::MAX`.
//! - [`LabelEncoding::PackedRgba`]: the 32-bit label split over four
//!   8-bit channels. Bits 0-7 go to red, 8-15 to green, 16-23 to blue,
//!   and alpha holds `255` minus bits 24-31, so ordinary labels stay
//!   fully opaque. Lossless for every `u32`.
//! - [`LabelEncoding::Float32`]: one 32-bit float gray channel, TIFF only,
//!   as read by tools that load label stacks as float volumes. Exact up to
//!   `2^24`; larger labels are rejected.
//!
//! This is a pure function with no I/O: it returns the encoded bytes.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use basin_pipeline::Segmentation;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgba};
use serde::{Deserialize, Serialize};
use tiff::encoder::{TiffEncoder, colortype};

use crate::error::ExportError;

/// How labels are stored in slice pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LabelEncoding {
    /// 16-bit grayscale; labels above `u16::MAX` are rejected.
    Gray16,
    /// Lossless 32-bit label packed into RGBA8.
    #[default]
    PackedRgba,
    /// 32-bit float grayscale TIFF; labels above `2^24` are rejected.
    Float32,
}

impl LabelEncoding {
    /// Largest label the encoding can store.
    #[must_use]
    pub const fn max_label(self) -> u32 {
        match self {
            Self::Gray16 => u16::MAX as u32,
            Self::PackedRgba => u32::MAX,
            Self::Float32 => 1 << f32::MANTISSA_DIGITS,
        }
    }

    /// Short name, also accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gray16 => "gray16",
            Self::PackedRgba => "rgba",
            Self::Float32 => "float32",
        }
    }
}

impl fmt::Display for LabelEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LabelEncoding {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gray16" | "gray" => Ok(Self::Gray16),
            "rgba" | "packed-rgba" => Ok(Self::PackedRgba),
            "float32" | "f32" => Ok(Self::Float32),
            _ => Err(ExportError::UnknownOption {
                kind: "label encoding",
                value: s.to_string(),
            }),
        }
    }
}

/// Image container for label slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SliceFormat {
    /// Portable Network Graphics.
    Png,
    /// Tagged Image File Format.
    #[default]
    Tiff,
}

impl SliceFormat {
    /// File extension without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Tiff => "tif",
        }
    }

    /// The matching `image` crate format.
    #[must_use]
    pub const fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Tiff => ImageFormat::Tiff,
        }
    }
}

impl fmt::Display for SliceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SliceFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "tif" | "tiff" => Ok(Self::Tiff),
            _ => Err(ExportError::UnknownOption {
                kind: "slice format",
                value: s.to_string(),
            }),
        }
    }
}

/// Split a label into RGBA8 channels.
#[must_use]
pub const fn pack_label(label: u32) -> [u8; 4] {
    let [r, g, b, high] = label.to_le_bytes();
    [r, g, b, 255 - high]
}

/// Recover a label from RGBA8 channels written by [`pack_label`].
#[must_use]
pub const fn decode_packed_rgba(pixel: [u8; 4]) -> u32 {
    let [r, g, b, a] = pixel;
    u32::from_le_bytes([r, g, b, 255 - a])
}

/// Encode slice `z` of `segmentation` as an image file in memory.
///
/// # Errors
///
/// - [`ExportError::SliceOutOfRange`] if `z` is not a slice index.
/// - [`ExportError::LabelOverflow`] if a label exceeds
///   [`LabelEncoding::max_label`].
/// - [`ExportError::UnsupportedFormat`] for [`LabelEncoding::Float32`]
///   with a format other than TIFF.
/// - [`ExportError::Encode`] or [`ExportError::TiffEncode`] if the
///   encoder fails.
pub fn encode_slice(
    segmentation: &Segmentation,
    z: u32,
    encoding: LabelEncoding,
    format: SliceFormat,
) -> Result<Vec<u8>, ExportError> {
    let dimensions = segmentation.dimensions();
    let labels = segmentation
        .slice(z)
        .ok_or(ExportError::SliceOutOfRange {
            z,
            size_z: dimensions.size_z,
        })?;
    let (width, height) = (dimensions.size_x, dimensions.size_y);

    let image = match encoding {
        LabelEncoding::Gray16 => {
            let pixels = labels
                .iter()
                .map(|&label| {
                    u16::try_from(label).map_err(|_| ExportError::LabelOverflow {
                        label,
                        z,
                        max: encoding.max_label(),
                        encoding: encoding.name(),
                    })
                })
                .collect::<Result<Vec<u16>, _>>()?;
            ImageBuffer::<Luma<u16>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageLuma16)
        }
        LabelEncoding::PackedRgba => {
            let pixels: Vec<u8> = labels.iter().flat_map(|&label| pack_label(label)).collect();
            ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageRgba8)
        }
        LabelEncoding::Float32 => return encode_float_tiff(labels, z, width, height, format),
    };
    let image = image.ok_or(ExportError::SliceOutOfRange {
        z,
        size_z: dimensions.size_z,
    })?;

    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format.image_format())?;
    Ok(bytes.into_inner())
}

#[allow(clippy::cast_precision_loss)]
fn encode_float_tiff(
    labels: &[u32],
    z: u32,
    width: u32,
    height: u32,
    format: SliceFormat,
) -> Result<Vec<u8>, ExportError> {
    let encoding = LabelEncoding::Float32;
    if format != SliceFormat::Tiff {
        return Err(ExportError::UnsupportedFormat {
            encoding: encoding.name(),
            format: format.extension(),
        });
    }
    let max = encoding.max_label();
    let pixels = labels
        .iter()
        .map(|&label| {
            if label <= max {
                Ok(label as f32)
            } else {
                Err(ExportError::LabelOverflow {
                    label,
                    z,
                    max,
                    encoding: encoding.name(),
                })
            }
        })
        .collect::<Result<Vec<f32>, _>>()?;

    let mut bytes = Cursor::new(Vec::new());
    TiffEncoder::new(&mut bytes)?.write_image::<colortype::Gray32Float>(width, height, &pixels)?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use basin_pipeline::Dimensions;

    use super::*;

    fn two_slices(labels: Vec<u32>) -> Segmentation {
        Segmentation::new(Dimensions::new(3, 2, 2), labels).unwrap()
    }

    #[test]
    fn pack_label_splits_bytes() {
        assert_eq!(pack_label(0), [0, 0, 0, 255]);
        assert_eq!(pack_label(1), [1, 0, 0, 255]);
        assert_eq!(pack_label(0x0001_0203), [3, 2, 1, 255]);
        assert_eq!(pack_label(u32::MAX), [255, 255, 255, 0]);
    }

    #[test]
    fn decode_inverts_pack() {
        for label in [0, 1, 255, 256, 65_535, 65_536, 0x00AB_CDEF, 0x0100_0000, u32::MAX] {
            assert_eq!(decode_packed_rgba(pack_label(label)), label);
        }
    }

    #[test]
    fn gray16_png_decodes_to_labels() {
        let seg = two_slices((1..=12).collect());
        let bytes = encode_slice(&seg, 1, LabelEncoding::Gray16, SliceFormat::Png).unwrap();
        let img = image::load_from_memory(&bytes).unwrap().into_luma16();
        assert_eq!((img.width(), img.height()), (3, 2));
        assert_eq!(img.get_pixel(0, 0).0[0], 7);
        assert_eq!(img.get_pixel(2, 1).0[0], 12);
    }

    #[test]
    fn packed_rgba_tiff_decodes_to_labels() {
        let mut labels: Vec<u32> = (1..=12).collect();
        labels[4] = 70_000;
        let seg = two_slices(labels);
        let bytes = encode_slice(&seg, 0, LabelEncoding::PackedRgba, SliceFormat::Tiff).unwrap();
        let img = image::load_from_memory(&bytes).unwrap().into_rgba8();
        assert_eq!(decode_packed_rgba(img.get_pixel(1, 1).0), 70_000);
        assert_eq!(decode_packed_rgba(img.get_pixel(0, 0).0), 1);
    }

    #[test]
    fn gray16_rejects_large_labels() {
        let mut labels = vec![1; 12];
        labels[9] = 70_000;
        let seg = two_slices(labels);
        assert!(encode_slice(&seg, 0, LabelEncoding::Gray16, SliceFormat::Png).is_ok());
        let err = encode_slice(&seg, 1, LabelEncoding::Gray16, SliceFormat::Png).unwrap_err();
        assert!(matches!(
            err,
            ExportError::LabelOverflow {
                label: 70_000,
                z: 1,
                ..
            }
        ));
    }

    #[test]
    fn float32_tiff_holds_labels_as_floats() {
        let seg = two_slices((1..=12).collect());
        let bytes = encode_slice(&seg, 1, LabelEncoding::Float32, SliceFormat::Tiff).unwrap();
        let mut decoder = tiff::decoder::Decoder::new(Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (3, 2));
        assert_eq!(decoder.colortype().unwrap(), tiff::ColorType::Gray(32));
        let tiff::decoder::DecodingResult::F32(pixels) = decoder.read_image().unwrap() else {
            unreachable!("float TIFF decodes to f32 samples");
        };
        assert_eq!(pixels, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn float32_needs_tiff_and_exact_labels() {
        let seg = two_slices(vec![1; 12]);
        assert!(matches!(
            encode_slice(&seg, 0, LabelEncoding::Float32, SliceFormat::Png),
            Err(ExportError::UnsupportedFormat { .. })
        ));

        let mut labels = vec![1; 12];
        labels[0] = (1 << 24) + 1;
        let seg = two_slices(labels);
        assert!(matches!(
            encode_slice(&seg, 0, LabelEncoding::Float32, SliceFormat::Tiff),
            Err(ExportError::LabelOverflow { z: 0, .. })
        ));
    }

    #[test]
    fn out_of_range_slice() {
        let seg = two_slices(vec![1; 12]);
        assert!(matches!(
            encode_slice(&seg, 2, LabelEncoding::PackedRgba, SliceFormat::Png),
            Err(ExportError::SliceOutOfRange { z: 2, size_z: 2 })
        ));
    }

    #[test]
    fn parse_names() {
        assert_eq!("gray16".parse::<LabelEncoding>().unwrap(), LabelEncoding::Gray16);
        assert_eq!("RGBA".parse::<LabelEncoding>().unwrap(), LabelEncoding::PackedRgba);
        assert_eq!("tiff".parse::<SliceFormat>().unwrap(), SliceFormat::Tiff);
        assert_eq!("png".parse::<SliceFormat>().unwrap(), SliceFormat::Png);
        assert!("jpeg".parse::<SliceFormat>().is_err());
        assert!("rgb".parse::<LabelEncoding>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for encoding in [LabelEncoding::Gray16, LabelEncoding::PackedRgba, LabelEncoding::Float32] {
            assert_eq!(encoding.to_string().parse::<LabelEncoding>().unwrap(), encoding);
        }
        for format in [SliceFormat::Png, SliceFormat::Tiff] {
            assert_eq!(format.to_string().parse::<SliceFormat>().unwrap(), format);
        }
    }
}
