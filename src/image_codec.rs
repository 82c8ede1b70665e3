use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;
const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Decodes any supported raster format into RGB8.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, CodecError> {
    let image_reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::Decode(e.to_string()))?;

    let image = image_reader
        .decode()
        .map_err(|e| CodecError::Decode(e.to_string()))?;

    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(buf)
}

/// JPEG bytes as an inline `data:` URI.
pub fn to_data_uri(image: &RgbImage, quality: u8) -> Result<String, CodecError> {
    let jpeg = encode_jpeg(image, quality)?;
    Ok(format!("{}{}", JPEG_DATA_URI_PREFIX, STANDARD.encode(jpeg)))
}
