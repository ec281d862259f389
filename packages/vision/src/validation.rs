use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};

use crate::error::StageError;

pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MIN_DIMENSION: u32 = 50;
pub const DEFAULT_MAX_DIMENSION: u32 = 5000;

/// Bounds an upload has to satisfy before any processing happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub max_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            min_dimension: DEFAULT_MIN_DIMENSION,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageValidator {
    policy: ValidationPolicy,
}

impl ImageValidator {
    /// Formats accepted for upload.
    pub const ALLOWED_FORMATS: [ImageFormat; 2] = [ImageFormat::Jpeg, ImageFormat::Png];

    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Checks size, declared and actual format, and dimensions, then decodes.
    ///
    /// A missing or generic (`application/octet-stream`) content type is
    /// replaced by the format sniffed from the bytes.
    pub fn validate(
        &self,
        bytes: &[u8],
        declared_content_type: Option<&str>,
    ) -> Result<DynamicImage, StageError> {
        if bytes.is_empty() {
            return Err(StageError::invalid_image("Uploaded file is empty"));
        }

        if bytes.len() > self.policy.max_bytes {
            return Err(StageError::invalid_image(format!(
                "File too large: {} bytes (maximum {} bytes)",
                bytes.len(),
                self.policy.max_bytes
            )));
        }

        if let Some(declared) = declared_content_type.and_then(declared_format) {
            match declared {
                Some(format) if Self::is_allowed(format) => {}
                _ => {
                    return Err(StageError::invalid_image(format!(
                        "Unsupported content type '{}'. Allowed: image/jpeg, image/png",
                        declared_content_type.unwrap_or_default()
                    )));
                }
            }
        }

        let sniffed = image::guess_format(bytes)
            .map_err(|e| StageError::invalid_image(format!("Unrecognized image data: {}", e)))?;
        if !Self::is_allowed(sniffed) {
            return Err(StageError::invalid_image(format!(
                "Unsupported image format {:?}. Allowed: JPEG, PNG",
                sniffed
            )));
        }

        let (width, height) = ImageReader::with_format(Cursor::new(bytes), sniffed)
            .into_dimensions()
            .map_err(|e| StageError::invalid_image(format!("Unreadable image header: {}", e)))?;
        self.check_dimensions(width, height)?;

        ImageReader::with_format(Cursor::new(bytes), sniffed)
            .decode()
            .map_err(|e| StageError::invalid_image(format!("Image could not be decoded: {}", e)))
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), StageError> {
        let min = self.policy.min_dimension;
        let max = self.policy.max_dimension;
        if width < min || height < min {
            return Err(StageError::invalid_image(format!(
                "Image too small: {}x{} (minimum {}x{})",
                width, height, min, min
            )));
        }
        if width > max || height > max {
            return Err(StageError::invalid_image(format!(
                "Image too large: {}x{} (maximum {}x{})",
                width, height, max, max
            )));
        }
        Ok(())
    }

    fn is_allowed(format: ImageFormat) -> bool {
        Self::ALLOWED_FORMATS.contains(&format)
    }
}

/// `None` when the content type carries no format information,
/// `Some(None)` when it names a format we do not know.
fn declared_format(content_type: &str) -> Option<Option<ImageFormat>> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "" | "application/octet-stream" => None,
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Some(ImageFormat::Jpeg)),
        "image/png" | "image/x-png" => Some(Some(ImageFormat::Png)),
        other => Some(ImageFormat::from_mime_type(other)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    pub(crate) fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn accepts_valid_jpeg_and_png() {
        let validator = ImageValidator::default();

        let jpeg = encode(224, 224, ImageFormat::Jpeg);
        let img = validator.validate(&jpeg, Some("image/jpeg")).unwrap();
        assert_eq!((img.width(), img.height()), (224, 224));

        let png = encode(64, 80, ImageFormat::Png);
        let img = validator.validate(&png, Some("image/png")).unwrap();
        assert_eq!((img.width(), img.height()), (64, 80));
    }

    #[test]
    fn infers_format_when_content_type_is_missing() {
        let validator = ImageValidator::default();
        let png = encode(60, 60, ImageFormat::Png);
        assert!(validator.validate(&png, None).is_ok());
        assert!(validator
            .validate(&png, Some("application/octet-stream"))
            .is_ok());
    }

    #[test]
    fn rejects_out_of_bounds_dimensions_for_any_format() {
        let validator = ImageValidator::default();
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            for (w, h) in [(30, 30), (49, 200), (200, 49), (1, 1)] {
                let bytes = encode(w, h, format);
                let err = validator.validate(&bytes, None).unwrap_err();
                assert!(matches!(err, StageError::InvalidImage(_)), "{w}x{h}");
            }
        }

        let small_max = ImageValidator::new(ValidationPolicy {
            max_dimension: 100,
            ..ValidationPolicy::default()
        });
        let bytes = encode(101, 60, ImageFormat::Png);
        let err = small_max.validate(&bytes, Some("image/png")).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn boundary_dimensions_are_accepted() {
        let validator = ImageValidator::new(ValidationPolicy {
            max_dimension: 120,
            ..ValidationPolicy::default()
        });
        assert!(validator.validate(&encode(50, 50, ImageFormat::Png), None).is_ok());
        assert!(validator.validate(&encode(120, 120, ImageFormat::Png), None).is_ok());
    }

    #[test]
    fn rejects_oversized_payload() {
        let validator = ImageValidator::new(ValidationPolicy {
            max_bytes: 100,
            ..ValidationPolicy::default()
        });
        let bytes = encode(64, 64, ImageFormat::Png);
        assert!(bytes.len() > 100);
        let err = validator.validate(&bytes, Some("image/png")).unwrap_err();
        assert!(err.to_string().contains("File too large"));
    }

    #[test]
    fn rejects_disallowed_formats() {
        let validator = ImageValidator::default();

        let gif = encode(64, 64, ImageFormat::Gif);
        let err = validator.validate(&gif, None).unwrap_err();
        assert!(matches!(err, StageError::InvalidImage(_)));

        let png = encode(64, 64, ImageFormat::Png);
        let err = validator.validate(&png, Some("image/gif")).unwrap_err();
        assert!(err.to_string().contains("Unsupported content type"));

        let err = validator.validate(&png, Some("text/plain")).unwrap_err();
        assert!(matches!(err, StageError::InvalidImage(_)));
    }

    #[test]
    fn rejects_garbage_and_truncated_bytes() {
        let validator = ImageValidator::default();
        let err = validator.validate(b"definitely not an image", None).unwrap_err();
        assert!(matches!(err, StageError::InvalidImage(_)));

        let err = validator.validate(&[], Some("image/png")).unwrap_err();
        assert!(matches!(err, StageError::InvalidImage(_)));

        let png = encode(64, 64, ImageFormat::Png);
        let truncated = &png[..png.len() / 2];
        assert!(validator.validate(truncated, Some("image/png")).is_err());
    }
}
