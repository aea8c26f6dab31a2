//! Image encoding: receipt file bytes → base64 wrapped in `ImageData`.
//!
//! The bytes are sent as-is. Re-encoding a phone JPEG to PNG would triple the
//! payload without adding any detail the model could use.
//! `detail: "high"` instructs GPT-4-class models to tile the image at full
//! resolution; without it small print such as unit prices is lost.

use crate::error::ReceiptError;
use crate::pipeline::input::sniff_image;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// Encode raw image bytes for the vision API. The MIME type comes from the
/// file signature, not the client's file name.
pub fn encode_receipt(bytes: &[u8]) -> Result<ImageData, ReceiptError> {
    let format = sniff_image(bytes)?;
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded receipt → {} bytes base64 ({:?})", b64.len(), format);

    Ok(ImageData::new(b64, format.to_mime_type()).with_detail("high"))
}

/// Read and encode an image file.
pub async fn encode_receipt_file(path: &Path) -> Result<ImageData, ReceiptError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| ReceiptError::FileNotFound {
            path: path.to_path_buf(),
        })?;
    encode_receipt(&bytes)
}
