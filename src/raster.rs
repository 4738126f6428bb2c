//! Decoded pixel grids.
//!
//! The fingerprinting core never decodes files itself; callers hand it a
//! [`RasterImage`] whose intensities are already scaled to `0.0..=1.0`.

use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RasterError {
    #[error("Invalid image dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),
    #[error("Pixel count mismatch: expected {expected}, got {actual}")]
    PixelCountMismatch { expected: usize, actual: usize },
}

/// Immutable height × width grid, row-major, RGB interleaved when `channels == 3`.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    width: usize,
    height: usize,
    channels: usize,
    pixels: Vec<f32>,
}

impl RasterImage {
    pub fn grayscale(width: usize, height: usize, pixels: Vec<f32>) -> Result<Self, RasterError> {
        Self::with_channels(width, height, 1, pixels)
    }

    pub fn rgb(width: usize, height: usize, pixels: Vec<f32>) -> Result<Self, RasterError> {
        Self::with_channels(width, height, 3, pixels)
    }

    fn with_channels(
        width: usize,
        height: usize,
        channels: usize,
        pixels: Vec<f32>,
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidDimensions(width, height));
        }
        let expected = width * height * channels;
        if pixels.len() != expected {
            return Err(RasterError::PixelCountMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    /// Converts a decoded image into an RGB grid, dropping any alpha channel.
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self, RasterError> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let pixels = rgb
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();
        Self::rgb(width as usize, height as usize, pixels)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Channel values of the pixel at column `x`, row `y`.
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.pixels[start..start + self.channels]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn rejects_wrong_pixel_count() {
        let err = RasterImage::rgb(2, 2, vec![0.0; 11]).unwrap_err();
        assert_eq!(
            err,
            RasterError::PixelCountMismatch {
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert_eq!(
            RasterImage::grayscale(0, 3, vec![]).unwrap_err(),
            RasterError::InvalidDimensions(0, 3)
        );
    }

    #[test]
    fn from_dynamic_scales_to_unit_range() {
        let mut img = RgbImage::from_pixel(3, 2, Rgb([255, 255, 255]));
        img.put_pixel(1, 1, Rgb([255, 0, 51]));
        let raster = RasterImage::from_dynamic(&DynamicImage::ImageRgb8(img)).unwrap();
        assert_eq!(raster.width(), 3);
        assert_eq!(raster.height(), 2);
        assert_eq!(raster.channels(), 3);
        assert_eq!(raster.pixel(0, 0), &[1.0, 1.0, 1.0]);
        let px = raster.pixel(1, 1);
        assert_eq!(px[0], 1.0);
        assert_eq!(px[1], 0.0);
        assert!((px[2] - 0.2).abs() < 1e-6);
    }
}
