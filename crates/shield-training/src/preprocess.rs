//! Image decoding for the classifier input.
//!
//! Images are resized to the square model input and scaled to [0, 1] with
//! no further normalisation. The exported model takes the same values in
//! NHWC order; training feeds them channel-first, the layout burn
//! convolutions use.

use crate::error::TrainingResult;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePreprocessor {
    input_size: u32,
}

impl ImagePreprocessor {
    #[must_use]
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    #[must_use]
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Values produced per image (3 x size x size).
    #[must_use]
    pub fn values_per_image(&self) -> usize {
        let size = self.input_size as usize;
        3 * size * size
    }

    /// Reads only the header, enough to reject files that are not images.
    pub fn check_header(&self, path: &Path) -> TrainingResult<()> {
        ImageReader::open(path)?.with_guessed_format()?.into_dimensions()?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> TrainingResult<Vec<f32>> {
        let img = image::open(path)?;
        Ok(self.to_chw(&img))
    }

    /// Pixel values in CHW order: index `channel * size * size + y * size + x`.
    #[must_use]
    pub fn to_chw(&self, img: &DynamicImage) -> Vec<f32> {
        let size = self.input_size;
        let rgb = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();
        let plane = (size * size) as usize;

        let mut out = vec![0f32; self.values_per_image()];
        for (x, y, px) in rgb.enumerate_pixels() {
            let at = (y * size + x) as usize;
            for c in 0..3 {
                out[c * plane + at] = f32::from(px[c]) / 255.0;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_solid_color_fills_each_plane() {
        let pre = ImagePreprocessor::new(4);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 30, Rgb([255, 0, 51])));

        let values = pre.to_chw(&img);
        assert_eq!(values.len(), pre.values_per_image());
        assert!(values[..16].iter().all(|v| (v - 1.0).abs() < 1e-2));
        assert!(values[16..32].iter().all(|v| v.abs() < 1e-2));
        assert!(values[32..].iter().all(|v| (v - 0.2).abs() < 1e-2));
    }

    #[test]
    fn test_load_reads_png_and_header_check_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good.png");
        RgbImage::from_pixel(8, 8, Rgb([0, 255, 0])).save(&good).unwrap();
        let bad = temp.path().join("bad.jpg");
        std::fs::write(&bad, b"not an image").unwrap();

        let pre = ImagePreprocessor::new(8);
        pre.check_header(&good).unwrap();
        let values = pre.load(&good).unwrap();
        assert!((values[64] - 1.0).abs() < 1e-2);
        assert!(pre.check_header(&bad).is_err());
        assert!(pre.load(&bad).is_err());
    }
}
