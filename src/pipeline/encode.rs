//! Payload decoding and image encoding.
//!
//! Requests carry the file as standard base64; images leave the pipeline as
//! base64 again, wrapped in an [`ImagePart`]. Rasterised document pages are
//! JPEG-encoded: a multi-page PDF can otherwise exceed the request-size
//! limits of typical OpenAI-compatible servers.

use crate::error::ExplainError;
use crate::pipeline::message::ImagePart;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Decode a request payload into raw bytes.
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>, ExplainError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ExplainError::InvalidPayload {
            detail: e.to_string(),
        })
}

/// Wrap raw raster bytes as an image part.
pub fn encode_bytes(mime_type: &str, bytes: &[u8]) -> ImagePart {
    ImagePart::new(mime_type, STANDARD.encode(bytes))
}

/// Encode a rendered page as a base64 JPEG.
///
/// The image is flattened to RGB first; JPEG has no alpha channel.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<ImagePart, image::ImageError> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;

    let part = encode_bytes("image/jpeg", &buf);
    debug!("Encoded page → {} bytes JPEG, {} bytes base64", buf.len(), part.data.len());
    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn decode_valid_payload() {
        assert_eq!(decode_payload("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_payload(" aGVsbG8=\n").unwrap(), b"hello");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_payload("not base64!!").unwrap_err();
        assert!(matches!(err, ExplainError::InvalidPayload { .. }));
    }

    #[test]
    fn encode_small_page_as_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let part = encode_jpeg(&img, 85).expect("encode should succeed");
        assert_eq!(part.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&part.data).expect("valid base64");
        // JPEG SOI marker
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn encode_bytes_round_trips() {
        let part = encode_bytes("image/png", b"\x89PNG");
        assert_eq!(decode_payload(&part.data).unwrap(), b"\x89PNG");
    }
}
