//! Image codec capability — decode, orientation transforms, resize, and
//! quality-parameterized encoding behind one trait.
//!
//! The compression search in `normalize` is written against this trait, so
//! the algorithm stays platform-neutral: the production implementation uses
//! the pure-Rust `image` crate, tests drive the search with synthetic
//! encoders, and a GPU-backed codec could slot in without touching the
//! search itself.

use std::io::Cursor;

use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

/// Errors from the image half of the pipeline.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Unsupported image format: {media_type}")]
    UnsupportedFormat { media_type: String },

    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Image could not be decoded: {0}")]
    DecodeError(String),

    #[error("Image could not be re-encoded")]
    CompressionFailed,
}

// ═══════════════════════════════════════════════════════════
// Output formats
// ═══════════════════════════════════════════════════════════

/// Encoded output formats the pipeline can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedFormat {
    Jpeg,
    Webp,
}

impl EncodedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ImageCodec trait
// ═══════════════════════════════════════════════════════════

/// Platform capability for raster work.
///
/// `quality` is normalized to 0.0–1.0 everywhere; implementations map it to
/// their encoder's native scale.
pub trait ImageCodec: Send + Sync {
    /// Decode raw file bytes into a raster.
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ImageError>;

    /// Apply an EXIF orientation transform (values 1–8) so the result is
    /// upright. Unknown values are a no-op.
    fn orient(&self, image: DynamicImage, orientation: u32) -> DynamicImage;

    /// Resize to exact dimensions (aspect ratio is the caller's concern).
    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage;

    /// Encode at the given quality. Fails with `CompressionFailed` when the
    /// format has no quality-parameterized encoder on this platform.
    fn encode(
        &self,
        image: &DynamicImage,
        format: EncodedFormat,
        quality: f32,
    ) -> Result<Vec<u8>, ImageError>;

    /// Whether this codec can encode the format at a chosen quality.
    fn supports_quality_encoding(&self, format: EncodedFormat) -> bool;
}

// ═══════════════════════════════════════════════════════════
// EXIF orientation
// ═══════════════════════════════════════════════════════════

/// Read the EXIF orientation tag (0x0112) from raw image bytes.
/// Returns 1 (upright) if there is no EXIF data or no orientation tag —
/// absence of metadata never fails the pipeline.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

// ═══════════════════════════════════════════════════════════
// RasterCodec — image-crate implementation
// ═══════════════════════════════════════════════════════════

/// Production codec backed by the `image` crate.
///
/// WebP is decoded but not encoded: the pure-Rust encoder has no quality
/// parameter, so `supports_quality_encoding(Webp)` is false and the
/// normalizer falls back to JPEG output.
pub struct RasterCodec;

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, ImageError> {
        image::load_from_memory(bytes).map_err(|e| ImageError::DecodeError(e.to_string()))
    }

    fn orient(&self, image: DynamicImage, orientation: u32) -> DynamicImage {
        // EXIF orientation values:
        // 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
        // 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
        match orientation {
            2 => image.fliph(),
            3 => image.rotate180(),
            4 => image.flipv(),
            5 => image.rotate90().fliph(),
            6 => image.rotate90(),
            7 => image.rotate270().fliph(),
            8 => image.rotate270(),
            _ => image,
        }
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        // Lanczos3 for photographic content
        image.resize_exact(width, height, FilterType::Lanczos3)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: EncodedFormat,
        quality: f32,
    ) -> Result<Vec<u8>, ImageError> {
        match format {
            EncodedFormat::Jpeg => {
                let q = (quality.clamp(0.0, 1.0) * 100.0).round() as u8;
                let mut output = Cursor::new(Vec::new());
                let encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, q.max(1));
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                rgb.write_with_encoder(encoder)
                    .map_err(|_| ImageError::CompressionFailed)?;
                Ok(output.into_inner())
            }
            EncodedFormat::Webp => Err(ImageError::CompressionFailed),
        }
    }

    fn supports_quality_encoding(&self, format: EncodedFormat) -> bool {
        matches!(format, EncodedFormat::Jpeg)
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
