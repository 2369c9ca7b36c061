//! Image normalization: validation, EXIF-upright re-rendering, downscaling,
//! and size-targeted re-encoding.
//!
//! The interesting part is the quality search: a bounded binary search over
//! the encoder quality parameter, aiming the encoded size into a target
//! band. Phone photos arrive anywhere from 80 KB to 12 MB; the band keeps
//! remote-analysis uploads predictable without visibly degrading the image.

use base64::Engine as _;
use tracing::debug;

use super::codec::{read_exif_orientation, EncodedFormat, ImageCodec, ImageError};

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Accepted upload media types.
const SUPPORTED_MEDIA_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

/// Upload size ceiling.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024; // 10 MB

// ═══════════════════════════════════════════════════════════
// Input / output types
// ═══════════════════════════════════════════════════════════

/// A raw uploaded file with its declared media type.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl Upload {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }
}

/// Output of normalization: an upright, size-targeted encoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    /// Self-describing data URI (`data:image/jpeg;base64,...`).
    pub data_uri: String,
    pub width: u32,
    pub height: u32,
    /// Encoded byte size (of the raw encoding, not the base64 text).
    pub byte_size: usize,
    pub format: EncodedFormat,
}

impl EncodedImage {
    /// The base64 payload of the data URI.
    pub fn base64_payload(&self) -> &str {
        self.data_uri
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or("")
    }

    /// Decode the payload back to encoded image bytes.
    pub fn decoded_bytes(&self) -> Result<Vec<u8>, ImageError> {
        decode_data_uri(&self.data_uri)
    }
}

/// Decode a data URI's base64 payload to raw bytes.
pub fn decode_data_uri(data_uri: &str) -> Result<Vec<u8>, ImageError> {
    let payload = data_uri
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or("");
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ImageError::DecodeError(format!("data URI payload: {e}")))
}

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// Tuning for the normalizer. Defaults are the production values.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Longest output edge.
    pub max_edge: u32,
    /// Target band for the encoded size.
    pub target_min_bytes: usize,
    pub target_max_bytes: usize,
    /// Encoder quality search bounds (0.0–1.0).
    pub quality_low: f32,
    pub quality_high: f32,
    /// Binary search iteration cap.
    pub max_iterations: usize,
    /// Early-exit tolerance around the band midpoint.
    pub mid_tolerance_bytes: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_edge: 1280,
            target_min_bytes: 200 * 1024,
            target_max_bytes: 300 * 1024,
            quality_low: 0.60,
            quality_high: 0.92,
            max_iterations: 8,
            mid_tolerance_bytes: 20 * 1024,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Normalizer
// ═══════════════════════════════════════════════════════════

/// Validates, uprights, downsizes, and re-encodes uploads.
pub struct ImageNormalizer<'a> {
    codec: &'a dyn ImageCodec,
    config: NormalizerConfig,
}

impl<'a> ImageNormalizer<'a> {
    pub fn new(codec: &'a dyn ImageCodec, config: NormalizerConfig) -> Self {
        Self { codec, config }
    }

    /// Run the full normalization chain on one upload.
    pub fn normalize(&self, upload: &Upload) -> Result<EncodedImage, ImageError> {
        self.validate(upload)?;

        let decoded = self.codec.decode(&upload.bytes)?;
        let orientation = read_exif_orientation(&upload.bytes);
        let upright = self.codec.orient(decoded, orientation);
        let needs_search = upright.width().max(upright.height()) > self.config.max_edge
            || upload.bytes.len() > self.config.target_max_bytes;

        let (width, height) = fit_within(upright.width(), upright.height(), self.config.max_edge);
        let sized = if (width, height) != (upright.width(), upright.height()) {
            self.codec.resize(&upright, width, height)
        } else {
            upright
        };

        // Prefer the higher-compression format when the codec can drive its
        // quality; fall back to the universal lossy format.
        let format = if self.codec.supports_quality_encoding(EncodedFormat::Webp) {
            EncodedFormat::Webp
        } else {
            EncodedFormat::Jpeg
        };

        let (bytes, quality) = if needs_search {
            let outcome = search_quality(
                |q| self.codec.encode(&sized, format, q),
                self.config.quality_low,
                self.config.quality_high,
                self.config.max_iterations,
                self.config.target_min_bytes,
                self.config.target_max_bytes,
                self.config.mid_tolerance_bytes,
            )?;
            (outcome.bytes, outcome.quality)
        } else {
            // Already small: one pass at the high bound for a uniform format
            let bytes = self
                .codec
                .encode(&sized, format, self.config.quality_high)?;
            (bytes, self.config.quality_high)
        };

        let byte_size = bytes.len();
        debug!(
            width,
            height,
            format = format.as_str(),
            quality = format!("{:.2}", quality),
            byte_size,
            orientation,
            searched = needs_search,
            "Image normalized"
        );

        Ok(EncodedImage {
            data_uri: to_data_uri(&bytes, format),
            width,
            height,
            byte_size,
            format,
        })
    }

    /// Render a small JPEG thumbnail (list display) from an image data URI.
    pub fn thumbnail(&self, data_uri: &str, max_edge: u32) -> Result<String, ImageError> {
        let decoded = self.codec.decode(&decode_data_uri(data_uri)?)?;
        let (w, h) = fit_within(decoded.width(), decoded.height(), max_edge);
        let small = if (w, h) != (decoded.width(), decoded.height()) {
            self.codec.resize(&decoded, w, h)
        } else {
            decoded
        };
        let bytes = self.codec.encode(&small, EncodedFormat::Jpeg, 0.7)?;
        Ok(to_data_uri(&bytes, EncodedFormat::Jpeg))
    }

    fn validate(&self, upload: &Upload) -> Result<(), ImageError> {
        if upload.media_type.is_empty()
            || !SUPPORTED_MEDIA_TYPES.contains(&upload.media_type.as_str())
        {
            return Err(ImageError::UnsupportedFormat {
                media_type: upload.media_type.clone(),
            });
        }
        if upload.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ImageError::FileTooLarge {
                size: upload.bytes.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }
        Ok(())
    }
}

/// Scale (w, h) down so the longest edge equals `max_edge`. Never scales up.
fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge {
        return (width, height);
    }
    let ratio = max_edge as f64 / longest as f64;
    let w = ((width as f64 * ratio).floor() as u32).max(1);
    let h = ((height as f64 * ratio).floor() as u32).max(1);
    (w, h)
}

fn to_data_uri(bytes: &[u8], format: EncodedFormat) -> String {
    format!(
        "data:{};base64,{}",
        format.mime(),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

// ═══════════════════════════════════════════════════════════
// Quality search
// ═══════════════════════════════════════════════════════════

/// Result of the quality search.
pub struct SearchOutcome {
    pub bytes: Vec<u8>,
    pub quality: f32,
    pub iterations: usize,
}

/// Bounded binary search over encoder quality, targeting
/// `[target_min, target_max]` encoded bytes.
///
/// Each iteration encodes at the interval midpoint. A size inside the band
/// is a candidate; within `mid_tolerance` of the band midpoint the search
/// stops early. Otherwise the interval narrows toward the band. The best
/// candidate is the one closest to the band midpoint — which means an
/// in-band encode can never lose to an out-of-band one. If the loop never
/// ran (iteration cap of zero), the final midpoint is encoded as a fallback.
pub fn search_quality<F>(
    mut encode: F,
    quality_low: f32,
    quality_high: f32,
    max_iterations: usize,
    target_min: usize,
    target_max: usize,
    mid_tolerance: usize,
) -> Result<SearchOutcome, ImageError>
where
    F: FnMut(f32) -> Result<Vec<u8>, ImageError>,
{
    let mid_target = (target_min + target_max) / 2;
    let mut low = quality_low;
    let mut high = quality_high;
    let mut best: Option<(Vec<u8>, f32, usize)> = None;
    let mut iterations = 0;

    for _ in 0..max_iterations {
        iterations += 1;
        let quality = (low + high) / 2.0;
        let bytes = encode(quality)?;
        let size = bytes.len();
        let distance = size.abs_diff(mid_target);

        let better = match &best {
            None => true,
            Some((_, _, best_distance)) => distance < *best_distance,
        };
        if better {
            best = Some((bytes, quality, distance));
        }

        let in_band = size >= target_min && size <= target_max;
        if in_band && distance < mid_tolerance {
            break;
        }

        // Narrow toward the band; inside it, creep toward the midpoint.
        if size > target_max {
            high = quality;
        } else if size < target_min {
            low = quality;
        } else if size < mid_target {
            low = quality;
        } else {
            high = quality;
        }
    }

    match best {
        Some((bytes, quality, _)) => Ok(SearchOutcome {
            bytes,
            quality,
            iterations,
        }),
        None => {
            // No iterations ran; encode once at the final midpoint.
            let quality = (low + high) / 2.0;
            let bytes = encode(quality)?;
            Ok(SearchOutcome {
                bytes,
                quality,
                iterations,
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::codec::RasterCodec;
    use base64::Engine as _;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    const KB: usize = 1024;

    fn config() -> NormalizerConfig {
        NormalizerConfig::default()
    }

    /// Synthetic monotonic encoder: size grows linearly with quality.
    fn linear_encoder(
        bytes_at_low: usize,
        bytes_at_high: usize,
    ) -> impl FnMut(f32) -> Result<Vec<u8>, ImageError> {
        move |q: f32| {
            let t = ((q - 0.60) / (0.92 - 0.60)).clamp(0.0, 1.0) as f64;
            let size =
                bytes_at_low as f64 + t * (bytes_at_high as f64 - bytes_at_low as f64);
            Ok(vec![0u8; size.round() as usize])
        }
    }

    fn run_search(
        encode: impl FnMut(f32) -> Result<Vec<u8>, ImageError>,
    ) -> SearchOutcome {
        let c = config();
        search_quality(
            encode,
            c.quality_low,
            c.quality_high,
            c.max_iterations,
            c.target_min_bytes,
            c.target_max_bytes,
            c.mid_tolerance_bytes,
        )
        .unwrap()
    }

    // ── search_quality ──────────────────────────────────

    #[test]
    fn search_converges_into_band() {
        // 100 KB..2 MB across the quality range: band is reachable
        let outcome = run_search(linear_encoder(100 * KB, 2048 * KB));
        assert!(outcome.iterations <= 8);
        assert!(
            outcome.bytes.len() >= 200 * KB && outcome.bytes.len() <= 300 * KB,
            "size {} outside band",
            outcome.bytes.len()
        );
    }

    #[test]
    fn search_early_exits_near_midpoint() {
        // First midpoint (q=0.76) lands exactly on 250 KB
        let outcome = run_search(linear_encoder(150 * KB, 350 * KB));
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.bytes.len(), 250 * KB);
    }

    #[test]
    fn search_in_band_whenever_any_iteration_lands_in_band() {
        // Sweep a range of encoder slopes; whenever some iteration produced
        // an in-band size, the returned size must be in-band.
        for top in [400 * KB, 600 * KB, 900 * KB, 1500 * KB, 4000 * KB] {
            let mut seen_in_band = false;
            let outcome = run_search(|q| {
                let result = linear_encoder(50 * KB, top)(q)?;
                if result.len() >= 200 * KB && result.len() <= 300 * KB {
                    seen_in_band = true;
                }
                Ok(result)
            });
            if seen_in_band {
                assert!(
                    outcome.bytes.len() >= 200 * KB && outcome.bytes.len() <= 300 * KB,
                    "top={top}: size {} escaped the band",
                    outcome.bytes.len()
                );
            }
        }
    }

    #[test]
    fn search_unreachable_band_returns_closest() {
        // Even max quality only reaches 80 KB: band unreachable from below
        let outcome = run_search(linear_encoder(20 * KB, 80 * KB));
        assert_eq!(outcome.iterations, 8);
        // Closest-to-midpoint candidate is the largest achievable size
        assert!(outcome.bytes.len() <= 80 * KB);
        assert!(outcome.bytes.len() >= 70 * KB);
    }

    #[test]
    fn search_caps_iterations_at_eight() {
        let mut calls = 0usize;
        let _ = run_search(|q| {
            calls += 1;
            linear_encoder(500 * KB, 510 * KB)(q)
        });
        assert!(calls <= 8, "encoder called {calls} times");
    }

    #[test]
    fn search_propagates_encoder_failure() {
        let c = config();
        let result = search_quality(
            |_q| Err(ImageError::CompressionFailed),
            c.quality_low,
            c.quality_high,
            c.max_iterations,
            c.target_min_bytes,
            c.target_max_bytes,
            c.mid_tolerance_bytes,
        );
        assert!(matches!(result, Err(ImageError::CompressionFailed)));
    }

    // ── fit_within ──────────────────────────────────────

    #[test]
    fn oversized_longest_edge_scaled_to_max() {
        assert_eq!(fit_within(4000, 3000, 1280), (1280, 960));
        assert_eq!(fit_within(3000, 4000, 1280), (960, 1280));
    }

    #[test]
    fn small_images_never_upscaled() {
        assert_eq!(fit_within(640, 480, 1280), (640, 480));
        assert_eq!(fit_within(1280, 720, 1280), (1280, 720));
    }

    #[test]
    fn extreme_aspect_ratio_keeps_min_dimension() {
        let (w, h) = fit_within(10000, 2, 1280);
        assert_eq!(w, 1280);
        assert!(h >= 1);
    }

    // ── normalize ───────────────────────────────────────

    fn test_upload(width: u32, height: u32) -> Upload {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.put_pixel(
                    x,
                    y,
                    Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8]),
                );
            }
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        Upload::new(out.into_inner(), "image/png")
    }

    #[test]
    fn rejects_undeclared_media_type() {
        let codec = RasterCodec;
        let normalizer = ImageNormalizer::new(&codec, config());
        let upload = Upload::new(vec![1, 2, 3], "application/pdf");
        assert!(matches!(
            normalizer.normalize(&upload),
            Err(ImageError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn rejects_oversized_upload() {
        let codec = RasterCodec;
        let normalizer = ImageNormalizer::new(&codec, config());
        let upload = Upload::new(vec![0u8; MAX_UPLOAD_BYTES + 1], "image/jpeg");
        assert!(matches!(
            normalizer.normalize(&upload),
            Err(ImageError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_undecodable_bytes() {
        let codec = RasterCodec;
        let normalizer = ImageNormalizer::new(&codec, config());
        let upload = Upload::new(b"not an image at all".to_vec(), "image/jpeg");
        assert!(matches!(
            normalizer.normalize(&upload),
            Err(ImageError::DecodeError(_))
        ));
    }

    #[test]
    fn large_image_downscaled_to_max_edge() {
        let codec = RasterCodec;
        let normalizer = ImageNormalizer::new(&codec, config());
        let upload = test_upload(2560, 1440);
        let encoded = normalizer.normalize(&upload).unwrap();
        assert_eq!(encoded.width.max(encoded.height), 1280);
        assert_eq!(encoded.format, EncodedFormat::Jpeg);
        assert!(encoded.data_uri.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn small_image_keeps_dimensions() {
        let codec = RasterCodec;
        let normalizer = ImageNormalizer::new(&codec, config());
        let upload = test_upload(320, 200);
        let encoded = normalizer.normalize(&upload).unwrap();
        assert_eq!((encoded.width, encoded.height), (320, 200));
    }

    #[test]
    fn byte_size_matches_payload() {
        let codec = RasterCodec;
        let normalizer = ImageNormalizer::new(&codec, config());
        let encoded = normalizer.normalize(&test_upload(320, 200)).unwrap();
        assert_eq!(encoded.decoded_bytes().unwrap().len(), encoded.byte_size);
    }

    #[test]
    fn thumbnail_fits_edge_and_is_jpeg() {
        let codec = RasterCodec;
        let normalizer = ImageNormalizer::new(&codec, config());
        let encoded = normalizer.normalize(&test_upload(800, 600)).unwrap();
        let thumb_uri = normalizer.thumbnail(&encoded.data_uri, 150).unwrap();
        assert!(thumb_uri.starts_with("data:image/jpeg;base64,"));

        let payload = thumb_uri.split_once(',').unwrap().1;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert!(img.width().max(img.height()) <= 150);
    }
}
