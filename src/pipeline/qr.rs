//! QR codes for share links.

use crate::error::SlidePullError;
use image::{DynamicImage, Luma};
use qrcode::{EcLevel, QrCode};

/// Pixels per QR module.
const MODULE_PX: u32 = 10;

/// Render `data` as a black-on-white PNG with a quiet zone.
///
/// Error correction is level L: the code only ever appears on screens and
/// in PDFs, and L keeps long share URLs at a scannable module count.
pub fn qr_png(data: &str) -> Result<Vec<u8>, SlidePullError> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)
        .map_err(|e| SlidePullError::QrGenerationFailed(e.to_string()))?;

    let img = code
        .render::<Luma<u8>>()
        .module_dimensions(MODULE_PX, MODULE_PX)
        .quiet_zone(true)
        .build();

    crate::pipeline::encode::encode_png(&DynamicImage::ImageLuma8(img))
        .map(|enc| enc.bytes)
        .map_err(|e| SlidePullError::QrGenerationFailed(e.to_string()))
}
