//! src/services/image_service.rs
//!
//! Normalizes uploads into the canonical stored form: JPEG quality 80,
//! fitting inside 800x800 without ever upscaling, EXIF rotation baked into
//! the pixels. JPEG sources keep their EXIF segment (with the orientation
//! tag reset); other sources are transcoded clean.

use crate::errors::AppError;
use bytes::Bytes;
use image::{
    DynamicImage, ImageDecoder, ImageFormat, ImageReader, codecs::jpeg::JpegEncoder,
    imageops::FilterType, metadata::Orientation,
};
use std::io::Cursor;

/// Longest edge of a stored image.
pub const MAX_DIMENSION: u32 = 800;

/// JPEG quality of stored images.
pub const JPEG_QUALITY: u8 = 80;

/// Content type every stored image ends up with.
pub const CANONICAL_CONTENT_TYPE: &str = "image/jpeg";

/// A normalized image ready for storage.
#[derive(Debug)]
pub struct NormalizedImage {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Decode, orient, bound, and re-encode an upload.
///
/// CPU-bound; callers run it under `tokio::task::spawn_blocking`. Input
/// that cannot be decoded is an [`AppError::MalformedImage`] — the
/// uploader's fault, not ours.
pub fn normalize(raw: &[u8]) -> Result<NormalizedImage, AppError> {
    let reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(AppError::malformed_image)?;
    let format = reader
        .format()
        .ok_or_else(|| AppError::malformed_image("unsupported image format"))?;

    let mut decoder = reader.into_decoder().map_err(AppError::malformed_image)?;
    // An unreadable orientation block should not fail the upload.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(AppError::malformed_image)?;
    image.apply_orientation(orientation);

    if image.width() > MAX_DIMENSION || image.height() > MAX_DIMENSION {
        image = image.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3);
    }

    // JPEG carries no alpha; flatten whatever the source had.
    let image = DynamicImage::ImageRgb8(image.into_rgb8());
    let (width, height) = (image.width(), image.height());

    let mut encoded = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
    image
        .write_with_encoder(encoder)
        .map_err(AppError::internal)?;

    let encoded = match (format == ImageFormat::Jpeg)
        .then(|| extract_exif(raw))
        .flatten()
    {
        Some(mut segment) => {
            reset_orientation(&mut segment);
            splice_exif(&encoded, &segment)
        }
        None => encoded,
    };

    Ok(NormalizedImage {
        bytes: encoded.into(),
        width,
        height,
    })
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP1: u8 = 0xE1;
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const ORIENTATION_TAG: u16 = 0x0112;

/// The EXIF APP1 segment of a JPEG (marker and length included), if one
/// appears before the scan data.
fn extract_exif(jpeg: &[u8]) -> Option<Vec<u8>> {
    if jpeg.len() < 4 || jpeg[0..2] != SOI {
        return None;
    }
    let mut i = 2;
    while i + 4 <= jpeg.len() {
        if jpeg[i] != 0xFF {
            return None;
        }
        let marker = jpeg[i + 1];
        match marker {
            // standalone markers carry no length word
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            // start of scan or end of image: no EXIF is coming
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
        if len < 2 || i + 2 + len > jpeg.len() {
            return None;
        }
        if marker == APP1 && jpeg[i + 4..i + 2 + len].starts_with(EXIF_HEADER) {
            return Some(jpeg[i..i + 2 + len].to_vec());
        }
        i += 2 + len;
    }
    None
}

/// Rewrite the EXIF orientation tag to 1 (top-left) in place.
///
/// The rotation has already been baked into the pixels, so a retained
/// orientation other than 1 would make viewers rotate twice. Segments this
/// walker cannot make sense of are left untouched.
fn reset_orientation(segment: &mut [u8]) {
    // marker(2) + length(2) + "Exif\0\0"(6)
    let tiff = 10;
    if segment.len() < tiff + 8 {
        return;
    }
    let be = match &segment[tiff..tiff + 2] {
        b"MM" => true,
        b"II" => false,
        _ => return,
    };
    if read_u16(segment, tiff + 2, be) != Some(42) {
        return;
    }
    let Some(ifd0) = read_u32(segment, tiff + 4, be) else {
        return;
    };
    let ifd0 = tiff + ifd0 as usize;
    let Some(count) = read_u16(segment, ifd0, be) else {
        return;
    };
    for n in 0..count as usize {
        let entry = ifd0 + 2 + n * 12;
        if read_u16(segment, entry, be) == Some(ORIENTATION_TAG) {
            // SHORT value sits inline at entry+8
            let value = entry + 8;
            if value + 2 <= segment.len() {
                let one = if be { [0, 1] } else { [1, 0] };
                segment[value] = one[0];
                segment[value + 1] = one[1];
            }
            return;
        }
    }
}

fn read_u16(buf: &[u8], offset: usize, be: bool) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    let pair = [bytes[0], bytes[1]];
    Some(if be {
        u16::from_be_bytes(pair)
    } else {
        u16::from_le_bytes(pair)
    })
}

fn read_u32(buf: &[u8], offset: usize, be: bool) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    let quad = [bytes[0], bytes[1], bytes[2], bytes[3]];
    Some(if be {
        u32::from_be_bytes(quad)
    } else {
        u32::from_le_bytes(quad)
    })
}

/// Insert an EXIF segment right after the SOI marker of an encoded JPEG.
fn splice_exif(jpeg: &[u8], segment: &[u8]) -> Vec<u8> {
    if jpeg.len() < 2 || jpeg[0..2] != SOI {
        return jpeg.to_vec();
    }
    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(segment);
    out.extend_from_slice(&jpeg[2..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        }))
    }

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        gradient(width, height)
            .write_to(&mut buf, ImageFormat::Jpeg)
            .expect("encode jpeg");
        buf.into_inner()
    }

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        gradient(width, height)
            .write_to(&mut buf, ImageFormat::Png)
            .expect("encode png");
        buf.into_inner()
    }

    /// Minimal EXIF APP1 segment holding a single orientation entry.
    fn exif_segment(orientation: u16, be: bool) -> Vec<u8> {
        let u16b = |v: u16| if be { v.to_be_bytes() } else { v.to_le_bytes() };
        let u32b = |v: u32| if be { v.to_be_bytes() } else { v.to_le_bytes() };
        let mut tiff = Vec::new();
        tiff.extend(if be { *b"MM" } else { *b"II" });
        tiff.extend(u16b(42));
        tiff.extend(u32b(8)); // IFD0 right after the header
        tiff.extend(u16b(1)); // one entry
        tiff.extend(u16b(ORIENTATION_TAG));
        tiff.extend(u16b(3)); // type SHORT
        tiff.extend(u32b(1)); // count
        tiff.extend(u16b(orientation));
        tiff.extend([0u8, 0]); // inline value padding
        tiff.extend(u32b(0)); // no next IFD

        let mut segment = vec![0xFF, APP1];
        segment.extend(((2 + EXIF_HEADER.len() + tiff.len()) as u16).to_be_bytes());
        segment.extend(EXIF_HEADER);
        segment.extend(tiff);
        segment
    }

    /// Orientation value stored in a segment, for assertions.
    fn exif_orientation(segment: &[u8]) -> Option<u16> {
        let tiff = 10;
        let be = match segment.get(tiff..tiff + 2)? {
            b"MM" => Some(true),
            b"II" => Some(false),
            _ => None,
        }?;
        let ifd0 = tiff + read_u32(segment, tiff + 4, be)? as usize;
        let count = read_u16(segment, ifd0, be)?;
        for n in 0..count as usize {
            let entry = ifd0 + 2 + n * 12;
            if read_u16(segment, entry, be)? == ORIENTATION_TAG {
                return read_u16(segment, entry + 8, be);
            }
        }
        None
    }

    #[test]
    fn large_images_shrink_to_the_bounding_box() {
        let out = normalize(&encode_jpeg(2000, 1000)).expect("normalize");
        assert_eq!((out.width, out.height), (800, 400));
        let decoded = image::load_from_memory(&out.bytes).expect("decode output");
        assert_eq!((decoded.width(), decoded.height()), (800, 400));
    }

    #[test]
    fn small_images_are_never_upscaled() {
        let out = normalize(&encode_jpeg(100, 50)).expect("normalize");
        assert_eq!((out.width, out.height), (100, 50));
    }

    #[test]
    fn output_is_always_jpeg() {
        let out = normalize(&encode_png(20, 20)).expect("normalize");
        assert_eq!(
            image::guess_format(&out.bytes).expect("sniff"),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn junk_bytes_are_a_malformed_image() {
        let err = normalize(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AppError::MalformedImage(_)));
    }

    #[test]
    fn truncated_jpeg_is_a_malformed_image() {
        let jpeg = encode_jpeg(100, 100);
        let err = normalize(&jpeg[..40]).unwrap_err();
        assert!(matches!(err, AppError::MalformedImage(_)));
    }

    #[test]
    fn exif_survives_with_orientation_reset() {
        let tagged = splice_exif(&encode_jpeg(100, 50), &exif_segment(6, false));

        let out = normalize(&tagged).expect("normalize");
        // Orientation 6 is a 90° rotation: it must bake into the pixels...
        assert_eq!((out.width, out.height), (50, 100));
        // ...while the carried EXIF now says "no further rotation".
        let segment = extract_exif(&out.bytes).expect("exif kept");
        assert_eq!(exif_orientation(&segment), Some(1));
    }

    #[test]
    fn big_endian_exif_is_patched_too() {
        let mut segment = exif_segment(3, true);
        reset_orientation(&mut segment);
        assert_eq!(exif_orientation(&segment), Some(1));
    }

    #[test]
    fn non_jpeg_sources_get_clean_output() {
        let out = normalize(&encode_png(30, 30)).expect("normalize");
        assert!(extract_exif(&out.bytes).is_none());
    }

    #[test]
    fn extract_finds_the_app1_segment() {
        let jpeg = encode_jpeg(10, 10);
        assert!(extract_exif(&jpeg).is_none());

        let tagged = splice_exif(&jpeg, &exif_segment(1, false));
        let segment = extract_exif(&tagged).expect("segment");
        assert!(segment.starts_with(&[0xFF, APP1]));
        assert!(segment[4..].starts_with(EXIF_HEADER));
    }
}
