//! Local dimension probe for the background-only workflow.
//!
//! When the client only wants the background swapped, the output keeps the
//! input's framing, so the measured pixel size replaces any client-declared
//! `width`/`height` in the normalised options. Only the image header is read:
//! no pixels are decoded and nothing goes over the network.

use crate::error::PhotoError;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// Pixel dimensions of an encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Read width and height from the image header.
pub fn measure_dimensions(bytes: &[u8]) -> Result<Dimensions, PhotoError> {
    if bytes.is_empty() {
        return Err(PhotoError::ImageDecode {
            detail: "empty buffer".into(),
        });
    }

    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PhotoError::ImageDecode {
            detail: e.to_string(),
        })?
        .into_dimensions()
        .map_err(|e| PhotoError::ImageDecode {
            detail: e.to_string(),
        })?;

    debug!("Measured input image: {}x{}", width, height);
    Ok(Dimensions { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    /// 1x1 GIF89a, one white pixel.
    const GIF_1X1: &[u8] = &[
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xFF,
        0xFF, 0xFF, 0x00, 0x00, 0x00, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C,
        0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00,
        0x3B,
    ];

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 10, 10])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format)
            .expect("encode should succeed");
        buf
    }

    #[test]
    fn measures_png() {
        let dims = measure_dimensions(&encode(37, 53, ImageFormat::Png)).unwrap();
        assert_eq!(dims, Dimensions { width: 37, height: 53 });
    }

    #[test]
    fn measures_jpeg() {
        let dims = measure_dimensions(&encode(120, 80, ImageFormat::Jpeg)).unwrap();
        assert_eq!(dims, Dimensions { width: 120, height: 80 });
    }

    #[test]
    fn measures_gif() {
        let dims = measure_dimensions(GIF_1X1).unwrap();
        assert_eq!(dims, Dimensions { width: 1, height: 1 });
    }

    #[test]
    fn measures_webp() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 4, Rgba([0, 0, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)
            .expect("encode should succeed");

        let dims = measure_dimensions(&buf).unwrap();
        assert_eq!(dims, Dimensions { width: 6, height: 4 });
    }

    #[test]
    fn measures_bmp_and_tiff() {
        let bmp = measure_dimensions(&encode(9, 7, ImageFormat::Bmp)).unwrap();
        assert_eq!(bmp, Dimensions { width: 9, height: 7 });
        let tiff = measure_dimensions(&encode(11, 5, ImageFormat::Tiff)).unwrap();
        assert_eq!(tiff, Dimensions { width: 11, height: 5 });
    }

    #[test]
    fn rejects_garbage() {
        let err = measure_dimensions(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PhotoError::ImageDecode { .. }));
        assert!(measure_dimensions(&[]).is_err());
    }
}
