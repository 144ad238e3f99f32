use std::io::Cursor;

use image::{
    DynamicImage, GenericImageView, ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType,
};
use thiserror::Error;

use super::config::IngestConfig;

const EXTRA_ATTEMPTS: u32 = 3;
const QUALITY_STEP: u8 = 20;
const MIN_QUALITY: u8 = 20;
const SHRINK_FACTOR: f64 = 0.9;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Unsupported or unrecognized image format")]
    UnknownFormat,
    #[error("Failed to process image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOptions {
    pub max_size: usize,
    pub min_width: u32,
    pub max_width: u32,
    pub quality: u8,
    pub preserve_format: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        IngestConfig::default().into()
    }
}

impl From<&IngestConfig> for CompressOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_size: config.compress_threshold_bytes,
            min_width: config.min_width,
            max_width: config.max_width,
            quality: config.quality,
            preserve_format: true,
        }
    }
}

impl From<IngestConfig> for CompressOptions {
    fn from(config: IngestConfig) -> Self {
        (&config).into()
    }
}

fn output_format(input: ImageFormat, preserve_format: bool) -> ImageFormat {
    match input {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif
            if preserve_format =>
        {
            input
        }
        _ => ImageFormat::Png,
    }
}

/// Short side raised to `min_width`, then width capped at `max_width`.
fn target_dimensions(width: u32, height: u32, options: &CompressOptions) -> (u32, u32) {
    let (mut w, mut h) = (width as f64, height as f64);
    let short_side = w.min(h);
    let min_width = options.min_width as f64;
    if short_side < min_width && short_side > 0.0 {
        let scale = min_width / short_side;
        w *= scale;
        h *= scale;
    }
    let max_width = options.max_width as f64;
    if w > max_width {
        h *= max_width / w;
        w = max_width;
    }
    (w.round().max(1.0) as u32, h.round().max(1.0) as u32)
}

fn resized(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

fn encode(
    image: &DynamicImage,
    format: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, CompressionError> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))?;
        }
        ImageFormat::WebP | ImageFormat::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buffer, format)?;
        }
        _ => image.write_to(&mut buffer, ImageFormat::Png)?,
    }
    Ok(buffer.into_inner())
}

/// Shrink an image until it fits `options.max_size`.
///
/// Input already within budget (and not narrower than `min_width`) is returned
/// unchanged. Otherwise the image is resized and re-encoded, with up to three
/// more attempts: JPEG lowers quality, other formats shrink by 10%. The last
/// attempt is returned even when it is still over budget.
pub fn compress_image(bytes: &[u8], options: &CompressOptions) -> Result<Vec<u8>, CompressionError> {
    let format = image::guess_format(bytes).map_err(|_| CompressionError::UnknownFormat)?;
    let image = image::load_from_memory_with_format(bytes, format)?;
    let (width, height) = image.dimensions();

    if bytes.len() <= options.max_size && width >= options.min_width {
        return Ok(bytes.to_vec());
    }

    let output = output_format(format, options.preserve_format);
    let (mut target_width, mut target_height) = target_dimensions(width, height, options);
    let mut quality = options.quality.clamp(1, 100);
    let mut encoded = encode(&resized(&image, target_width, target_height), output, quality)?;

    for attempt in 1..=EXTRA_ATTEMPTS {
        if encoded.len() <= options.max_size {
            break;
        }
        if output == ImageFormat::Jpeg {
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
        } else {
            target_width = ((target_width as f64) * SHRINK_FACTOR).round().max(1.0) as u32;
            target_height = ((target_height as f64) * SHRINK_FACTOR).round().max(1.0) as u32;
        }
        tracing::debug!(
            attempt,
            size = encoded.len(),
            quality,
            width = target_width,
            "Compressed image still over budget, retrying"
        );
        encoded = encode(&resized(&image, target_width, target_height), output, quality)?;
    }

    if encoded.len() > options.max_size {
        tracing::warn!(
            original = bytes.len(),
            compressed = encoded.len(),
            max = options.max_size,
            "Image is still over budget after compression"
        );
    } else {
        tracing::debug!(
            original = bytes.len(),
            compressed = encoded.len(),
            ?output,
            "Compressed image"
        );
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgb};

    use super::*;

    /// Incompressible RGB noise encoded as PNG.
    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x9E37_79B9;
        let buffer = ImageBuffer::from_fn(width, height, |_, _| {
            let mut next = || {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xFF) as u8
            };
            Rgb([next(), next(), next()])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn oversized_image_is_brought_under_limit() {
        let original = noisy_png(1200, 1000);
        let options = CompressOptions::default();
        assert!(original.len() > options.max_size);

        let compressed = compress_image(&original, &options).unwrap();

        assert!(compressed.len() <= options.max_size);
        let decoded = image::load_from_memory(&compressed).unwrap();
        assert!(decoded.width() <= options.max_width);
        assert!(decoded.width() >= options.min_width);
        assert_eq!(image::guess_format(&compressed).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn small_image_is_returned_unchanged() {
        let original = noisy_png(64, 64);
        let compressed = compress_image(&original, &CompressOptions::default()).unwrap();
        assert_eq!(compressed, original);
    }

    #[test]
    fn narrow_image_is_scaled_up_to_min_width() {
        let original = noisy_png(20, 10);
        let compressed = compress_image(&original, &CompressOptions::default()).unwrap();
        let decoded = image::load_from_memory(&compressed).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }

    #[test]
    fn target_dimensions_cap_width_and_keep_aspect() {
        let options = CompressOptions::default();
        assert_eq!(target_dimensions(4096, 2048, &options), (1024, 512));
        assert_eq!(target_dimensions(800, 600, &options), (800, 600));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            compress_image(b"definitely not an image", &CompressOptions::default()),
            Err(CompressionError::UnknownFormat)
        ));
    }
}
