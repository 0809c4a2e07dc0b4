//! Image encoding for stored slides and exported sets.
//!
//! Stored page images are lossless PNG so slide text stays crisp when zoomed.
//! Slide-set PDFs embed JPEG instead: a 40-slide set of 2× PNGs easily
//! exceeds 100 MB, while downscaled JPEG at quality 80 stays around 5 MB.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encoded image bytes plus what is needed to embed or serve them.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Lossless PNG.
pub fn encode_png(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} PNG → {} bytes", img.width(), img.height(), buf.len());
    Ok(EncodedImage {
        bytes: buf,
        width: img.width(),
        height: img.height(),
    })
}

/// Baseline JPEG. Alpha is flattened since JPEG has no transparency.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<EncodedImage, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
    Ok(EncodedImage {
        bytes: buf,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Downscale to at most `max_width`, keeping aspect ratio. Never upscales.
pub fn fit_width(img: &DynamicImage, max_width: u32) -> DynamicImage {
    if img.width() <= max_width {
        return img.clone();
    }
    let height = ((img.height() as u64 * max_width as u64) / img.width() as u64).max(1) as u32;
    img.resize_exact(max_width, height, FilterType::Lanczos3)
}
