//! Cover art re-encoding for the Spotify playlist image endpoint
//!
//! Spotify only accepts base64-encoded JPEG payloads under a size ceiling:
//! - Resized to fit within the configured dimension
//! - Baseline JPEG, quality lowered step by step until it fits
//! - Gives up (returns `None`) once the quality floor has been tried

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::config::CoverSettings;

/// Re-encode `data` so its base64 form fits under the payload ceiling
///
/// Returns the raw JPEG bytes, or `None` if the image cannot be decoded or
/// does not fit even at the lowest quality.
pub fn compress_cover(data: &[u8], settings: &CoverSettings) -> Option<Vec<u8>> {
    let img = match ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()
        .map(|reader| reader.decode())
    {
        Some(Ok(img)) => img,
        Some(Err(e)) => {
            warn!("Failed to decode cover art: {}", e);
            return None;
        }
        None => {
            warn!("Failed to guess cover art format");
            return None;
        }
    };

    // JPEG has no alpha channel
    let img = resize_to_fit(img, settings.max_dimension).to_rgb8();

    let mut quality = settings.start_quality;
    loop {
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
        if let Err(e) = encoder.encode_image(&img) {
            warn!("Failed to encode cover art as JPEG: {}", e);
            return None;
        }

        let payload = encoded_len(output.len());
        if payload <= settings.max_payload_bytes {
            debug!(
                "Processed cover art: {}x{} -> {} bytes, {} encoded (quality {})",
                img.width(),
                img.height(),
                output.len(),
                payload,
                quality
            );
            return Some(output);
        }

        if quality <= settings.min_quality {
            warn!(
                "Cover art still {} bytes encoded at quality {}, giving up",
                payload, quality
            );
            return None;
        }

        let next = quality
            .saturating_sub(settings.quality_step)
            .max(settings.min_quality);
        debug!(
            "Cover art too large ({} bytes encoded), reducing quality from {} to {}",
            payload, quality, next
        );
        quality = next;
    }
}

/// Size of the padded base64 form of `len` bytes
fn encoded_len(len: usize) -> usize {
    base64::encoded_len(len, true).unwrap_or(usize::MAX)
}

/// Resize image to fit within `max` while maintaining aspect ratio
fn resize_to_fit(img: DynamicImage, max: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= max && height <= max {
        return img;
    }

    let scale = |side: u32, ratio: f64| ((side as f64 * ratio).round() as u32).max(1);
    let (new_width, new_height) = if width > height {
        (max, scale(height, max as f64 / width as f64))
    } else {
        (scale(width, max as f64 / height as f64), max)
    };

    debug!(
        "Resizing cover art: {}x{} -> {}x{}",
        width, height, new_width, new_height
    );

    img.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use rand::Rng;

    /// PNG of random pixels, which JPEG compresses badly
    pub(crate) fn noise_png(size: u32) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let img = RgbaImage::from_fn(size, size, |_, _| {
            Rgba([rng.r#gen(), rng.r#gen(), rng.r#gen(), 255])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    pub(crate) fn flat_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_resize_small_image() {
        let img = DynamicImage::new_rgb8(100, 100);
        let resized = resize_to_fit(img, 640);
        assert_eq!(resized.width(), 100);
        assert_eq!(resized.height(), 100);
    }

    #[test]
    fn test_resize_large_image() {
        let img = DynamicImage::new_rgb8(1500, 1000);
        let resized = resize_to_fit(img, 640);
        assert_eq!((resized.width(), resized.height()), (640, 427));

        let img = DynamicImage::new_rgb8(1000, 3000);
        let resized = resize_to_fit(img, 640);
        assert_eq!((resized.width(), resized.height()), (213, 640));
    }

    #[test]
    fn test_flat_image_fits_at_start_quality() {
        let settings = CoverSettings::default();
        let jpeg = compress_cover(&flat_png(1024, 1024), &settings).unwrap();

        assert!(encoded_len(jpeg.len()) <= settings.max_payload_bytes);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 640));
    }

    #[test]
    fn test_gives_up_below_quality_floor() {
        let settings = CoverSettings {
            max_payload_bytes: 1024,
            ..CoverSettings::default()
        };
        assert!(compress_cover(&noise_png(256), &settings).is_none());
    }

    #[test]
    fn test_garbage_input_is_none() {
        assert!(compress_cover(b"not an image", &CoverSettings::default()).is_none());
    }

    #[test]
    fn test_encoded_len_matches_padded_base64() {
        assert_eq!(encoded_len(0), 0);
        assert_eq!(encoded_len(1), 4);
        assert_eq!(encoded_len(3), 4);
        assert_eq!(encoded_len(4), 8);
    }
}
