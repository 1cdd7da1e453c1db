//! Image encoding: image file → base64 text for the VLM request body.
//!
//! VLM APIs accept images as base64 data embedded in the JSON request.
//! The file bytes are sent as-is (no re-encode), so a JPEG upload stays a
//! JPEG and a rendered page stays a lossless PNG.

use crate::error::HandscribeError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// A base64-encoded image plus the MIME type the provider needs.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime_type: &'static str,
}

impl EncodedImage {
    /// `data:` URI form, handy for inline previews.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("base64_len", &self.base64.len())
            .finish()
    }
}

/// Read an image file and base64-encode its full contents.
pub async fn encode_image_file(path: &Path) -> Result<EncodedImage, HandscribeError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| HandscribeError::ImageReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
    encode_bytes(&bytes).ok_or_else(|| HandscribeError::UnsupportedImageFormat {
        path: path.to_path_buf(),
    })
}

/// MIME type of PNG or JPEG content; `None` for anything else.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        _ => None,
    }
}

/// Encode raw PNG or JPEG bytes. Returns `None` for other content.
pub fn encode_bytes(bytes: &[u8]) -> Option<EncodedImage> {
    let mime_type = sniff_mime_type(bytes)?;
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64 ({})", b64.len(), mime_type);

    Some(EncodedImage {
        base64: b64,
        mime_type,
    })
}
