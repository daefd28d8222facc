//! Tile image decoding

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("empty image data")]
    Empty,
}

/// Decoded raster, tightly packed RGB triplets row by row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl DecodedImage {
    /// RGB at (row, col); caller keeps indices in range
    #[inline]
    pub fn pixel(&self, row: u32, col: u32) -> [u8; 3] {
        let i = ((row * self.width + col) * 3) as usize;
        [self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]]
    }
}

/// Image decode capability
pub trait TileDecoder: Send + Sync {
    fn decode(&self, encoded: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// PNG/JPEG decoder backed by the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl TileDecoder for ImageDecoder {
    fn decode(&self, encoded: &[u8]) -> Result<DecodedImage, DecodeError> {
        if encoded.is_empty() {
            return Err(DecodeError::Empty);
        }
        let rgb = image::load_from_memory(encoded)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(DecodedImage { width, height, rgb: rgb.into_raw() })
    }
}

/// Encode an RGB buffer as PNG (feed tool, tests)
pub fn encode_png(width: u32, height: u32, rgb: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let img = image::RgbImage::from_raw(width, height, rgb.to_vec()).ok_or(DecodeError::Empty)?;
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_decode_dimensions_and_pixels() {
        let mut rgb = vec![0u8; 4 * 2 * 3];
        rgb[0..3].copy_from_slice(&[255, 0, 0]);
        // row 1, col 3
        rgb[21..24].copy_from_slice(&[0, 0, 255]);
        let png = encode_png(4, 2, &rgb).unwrap();

        let decoded = ImageDecoder.decode(&png).unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 2));
        assert_eq!(decoded.rgb.len(), 4 * 2 * 3);
        assert_eq!(decoded.pixel(0, 0), [255, 0, 0]);
        assert_eq!(decoded.pixel(1, 3), [0, 0, 255]);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(ImageDecoder.decode(&[]), Err(DecodeError::Empty)));
        assert!(matches!(ImageDecoder.decode(b"not an image"), Err(DecodeError::Image(_))));
    }
}
