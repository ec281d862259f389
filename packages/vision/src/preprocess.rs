use image::{DynamicImage, imageops::FilterType};
use ndarray::Array4;

use crate::error::StageError;

/// Edge length the shipped model was trained with.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Turns a decoded image into the `[1, H, W, 3]` tensor the model expects.
///
/// The resize target must match the training resolution exactly; a mismatch
/// does not fail, it silently degrades accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    width: u32,
    height: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::square(DEFAULT_INPUT_SIZE)
    }
}

impl Preprocessor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Tensor shape produced by [`Preprocessor::preprocess`].
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }

    pub fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>, StageError> {
        let rgb = image.to_rgb8();
        let resized = image::imageops::resize(&rgb, self.width, self.height, FilterType::CatmullRom);

        let data: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();

        Array4::from_shape_vec(self.shape(), data)
            .map_err(|e| StageError::preprocess(format!("Tensor shape error: {}", e)))
    }

    /// Decodes raw bytes before preprocessing; decode failures are preprocessing errors.
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<Array4<f32>, StageError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| StageError::preprocess(format!("Failed to decode image: {}", e)))?;
        self.preprocess(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::tests::encode;
    use image::{GrayImage, ImageFormat, Luma};

    #[test]
    fn produces_batched_nhwc_tensor() {
        let bytes = encode(300, 180, ImageFormat::Png);
        let tensor = Preprocessor::default().preprocess_bytes(&bytes).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
    }

    #[test]
    fn values_are_scaled_to_unit_range() {
        let bytes = encode(100, 100, ImageFormat::Png);
        let tensor = Preprocessor::square(64).preprocess_bytes(&bytes).unwrap();
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(tensor.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn grayscale_is_expanded_to_three_channels() {
        let gray = GrayImage::from_pixel(80, 80, Luma([255u8]));
        let tensor = Preprocessor::square(32)
            .preprocess(&DynamicImage::ImageLuma8(gray))
            .unwrap();
        assert_eq!(tensor.shape(), &[1, 32, 32, 3]);
        assert!(tensor.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn non_square_targets_use_height_then_width() {
        let bytes = encode(90, 90, ImageFormat::Png);
        let tensor = Preprocessor::new(128, 96).preprocess_bytes(&bytes).unwrap();
        assert_eq!(tensor.shape(), &[1, 96, 128, 3]);
    }

    #[test]
    fn undecodable_bytes_are_preprocess_errors() {
        let err = Preprocessor::default()
            .preprocess_bytes(b"\x89PNG\r\n\x1a\nbroken")
            .unwrap_err();
        assert!(matches!(err, StageError::Preprocess(_)));
    }
}
