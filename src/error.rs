//! Error types for the receipt-scan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReceiptError`]: **Fatal**: the request cannot be answered with a
//!   receipt record (bad upload, provider not configured, model call failed,
//!   timeout). Returned as `Err(ReceiptError)` and rendered by the HTTP layer
//!   as `{"error": "..."}` with the status from [`ReceiptError::status`].
//!
//! * [`BarcodeError`]: **Non-fatal**: the barcode scan failed. The detector
//!   logs it and reports "no barcode detected" instead, so a blurry barcode
//!   never costs the caller the rest of the receipt.
//!
//! A model reply that is not valid JSON is neither: it is reported inside
//! the response payload (see [`crate::output::ExtractionOutcome`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the receipt-scan library.
#[derive(Debug, Error)]
pub enum ReceiptError {
    // ── Client input errors ───────────────────────────────────────────────
    /// The endpoint only accepts POST.
    #[error("Only POST method is allowed")]
    MethodNotAllowed,

    /// The multipart body had no `receipt` file field.
    #[error("No receipt file provided")]
    NoReceiptFile,

    /// The uploaded file exceeds `ServiceConfig::max_upload_size`.
    #[error("File too large. Maximum size is {}MB", format_megabytes(.max_bytes))]
    FileTooLarge { max_bytes: usize },

    /// The uploaded bytes are not an image format we can send or scan.
    #[error("Unsupported image format: {detail}")]
    UnsupportedImage { detail: String },

    /// The multipart body itself could not be read.
    #[error("Invalid upload: {detail}")]
    InvalidUpload { status: StatusCode, detail: String },

    /// The download body is not valid JSON.
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    // ── CLI input errors ──────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model call failed (network, auth, quota, provider error).
    #[error("Error processing receipt: {message}")]
    LlmApiError { message: String },

    /// One of the two background tasks did not finish in time.
    #[error("Processing timeout exceeded")]
    Timeout { secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a file under the media root.
    #[error("Failed to write '{path}': {source}")]
    StorageFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReceiptError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            ReceiptError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ReceiptError::NoReceiptFile
            | ReceiptError::FileTooLarge { .. }
            | ReceiptError::UnsupportedImage { .. }
            | ReceiptError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ReceiptError::InvalidUpload { status, .. } => *status,
            ReceiptError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            ReceiptError::DownloadFailed { .. }
            | ReceiptError::DownloadTimeout { .. }
            | ReceiptError::ProviderNotConfigured { .. }
            | ReceiptError::LlmApiError { .. }
            | ReceiptError::Timeout { .. }
            | ReceiptError::StorageFailed { .. }
            | ReceiptError::InvalidConfig(_)
            | ReceiptError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the request rather than the service.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl IntoResponse for ReceiptError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// `10485760` → `"10"`, `524288` → `"0.5"`.
fn format_megabytes(bytes: &usize) -> String {
    let mb = *bytes as f64 / 1024.0 / 1024.0;
    if mb.fract() == 0.0 {
        format!("{}", mb as u64)
    } else {
        format!("{}", mb)
    }
}

/// A non-fatal barcode scan failure.
///
/// Never returned to HTTP callers; [`crate::pipeline::barcode::detect_and_regenerate`]
/// logs it and reports "no barcode detected".
#[derive(Debug, Error)]
pub enum BarcodeError {
    /// The image could not be opened or decoded.
    #[error("could not read image '{path}': {detail}")]
    UnreadableImage { path: PathBuf, detail: String },

    /// No symbol was found in the image.
    #[error("no barcode found")]
    NotFound,

    /// The decoded text cannot be expressed in the output symbology.
    #[error("could not encode '{text}' as Code 128: {detail}")]
    EncodeFailed { text: String, detail: String },

    /// The regenerated image could not be saved.
    #[error("could not save barcode image '{path}': {detail}")]
    SaveFailed { path: PathBuf, detail: String },
}
