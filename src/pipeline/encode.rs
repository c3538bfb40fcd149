//! Image encoding: rendered `DynamicImage` → JPEG bytes → base64 `ImageData`.
//!
//! Pages are stored in the dataset as JPEG: a dataset holds thousands of
//! page images, and at quality 90 text stays legible at a fraction of the
//! PNG size. The same bytes are sent to the VLM, so the model sees exactly
//! the image the training row will carry.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Encode a rasterised page as JPEG.
///
/// JPEG has no alpha channel, so the page is flattened to RGB first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
    debug!(
        "Encoded {}x{} page → {} bytes JPEG",
        rgb.width(),
        rgb.height(),
        buf.len()
    );
    Ok(buf)
}

/// Wrap JPEG bytes as a base64 image attachment for the VLM request.
///
/// `detail: "high"` keeps small print readable for GPT-4-class tiling.
pub fn to_image_data(jpeg: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(jpeg), "image/jpeg").with_detail("high")
}
