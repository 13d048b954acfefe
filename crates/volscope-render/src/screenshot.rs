//! Saving rendered frames to image files.

use image::{ImageBuffer, Rgba};
use std::path::Path;

/// Options for saving frames.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotOptions {
    /// Composite the frame over black instead of keeping its alpha.
    ///
    /// Without it, premultiplied output is converted to the straight alpha PNG expects.
    pub opaque_background: bool,
}

/// Saves tightly packed RGBA8 pixel data to an image file.
///
/// # Arguments
/// * `path` - Output path (supports .png, .jpg, .jpeg)
/// * `data` - Premultiplied RGBA pixel data, rows top to bottom, as read back from the output texture
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
///
/// # Errors
/// Returns an error if the file cannot be written or format is unsupported.
pub fn save_image(
    path: impl AsRef<Path>,
    data: &[u8],
    width: u32,
    height: u32,
    options: &ScreenshotOptions,
) -> Result<(), ScreenshotError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let img = to_image(data, width, height, options)?;

    match extension.as_str() {
        "png" => {
            img.save_with_format(path, image::ImageFormat::Png)?;
        }
        "jpg" | "jpeg" => {
            // JPEG has no alpha channel
            let rgb_img = image::DynamicImage::ImageRgba8(img).to_rgb8();
            rgb_img.save_with_format(path, image::ImageFormat::Jpeg)?;
        }
        _ => {
            return Err(ScreenshotError::UnsupportedFormat(extension));
        }
    }

    log::info!("saved {width}x{height} frame to {}", path.display());
    Ok(())
}

/// Encodes RGBA8 pixel data as PNG in memory.
pub fn save_to_buffer(
    data: &[u8],
    width: u32,
    height: u32,
    options: &ScreenshotOptions,
) -> Result<Vec<u8>, ScreenshotError> {
    let img = to_image(data, width, height, options)?;
    let mut buffer = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

fn to_image(
    data: &[u8],
    width: u32,
    height: u32,
    options: &ScreenshotOptions,
) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>, ScreenshotError> {
    let mut rgba = data.to_vec();
    for px in rgba.chunks_exact_mut(4) {
        if options.opaque_background {
            // Over black only the alpha changes.
            px[3] = 255;
        } else {
            unpremultiply(px);
        }
    }
    ImageBuffer::from_raw(width, height, rgba).ok_or(ScreenshotError::InvalidImageData)
}

/// Divides color by alpha in place. Fully transparent pixels become black.
fn unpremultiply(px: &mut [u8]) {
    let alpha = u32::from(px[3]);
    if alpha == 0 {
        px[..3].fill(0);
        return;
    }
    if alpha == 255 {
        return;
    }
    for c in &mut px[..3] {
        *c = ((u32::from(*c) * 255 + alpha / 2) / alpha).min(255) as u8;
    }
}

/// Error type for screenshot operations.
#[derive(Debug, thiserror::Error)]
pub enum ScreenshotError {
    #[error("Failed to save image: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid image data")]
    InvalidImageData,
}
