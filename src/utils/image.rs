use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;

/// Builds a `data:<mime>;base64,<payload>` reference from base64 image bytes.
pub fn to_data_uri(mime_type: &str, base64_payload: &str) -> String {
    format!("data:{};base64,{}", mime_type, base64_payload)
}

/// Splits a base64 data URI into its mime type and decoded bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("Data URI has no payload"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("Only base64 data URIs are supported"))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .context("Invalid base64 payload in data URI")?;
    if bytes.is_empty() {
        return Err(anyhow!("Data URI payload is empty"));
    }
    Ok((mime.to_string(), bytes))
}

/// A JPEG ready to be embedded as-is.
#[derive(Debug, Clone)]
pub struct JpegImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Decodes any supported image and re-encodes it as RGB JPEG.
pub fn normalize_to_jpeg(bytes: &[u8], quality: u8) -> Result<JpegImage> {
    let format = image::guess_format(bytes).context("Unrecognized image format")?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .context("Failed to decode image")?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();

    if format == ImageFormat::Jpeg && decoded.color() == image::ColorType::Rgb8 {
        return Ok(JpegImage { width, height, data: bytes.to_vec() });
    }

    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality)
        .encode_image(&rgb)
        .context("Failed to encode JPEG")?;
    Ok(JpegImage { width, height, data })
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    use std::io::Cursor;

    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[cfg(test)]
pub(crate) fn sample_data_uri() -> String {
    to_data_uri("image/png", &STANDARD.encode(sample_png(8, 8)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_uri() {
        let uri = to_data_uri("image/jpeg", &STANDARD.encode(b"abc"));
        let (mime, bytes) = decode_data_uri(&uri).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(bytes, b"abc");
    }

    #[test]
    fn test_decode_rejects_non_data_uri() {
        assert!(decode_data_uri("https://example.com/a.jpg").is_err());
        assert!(decode_data_uri("data:image/png,plain").is_err());
        assert!(decode_data_uri("data:image/png;base64,").is_err());
    }

    #[test]
    fn test_png_is_converted_to_jpeg() {
        let jpeg = normalize_to_jpeg(&sample_png(16, 9), 90).unwrap();
        assert_eq!((jpeg.width, jpeg.height), (16, 9));
        assert_eq!(image::guess_format(&jpeg.data).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(normalize_to_jpeg(b"definitely not an image", 90).is_err());
    }
}
