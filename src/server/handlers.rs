//! Request handlers.

use super::AppState;
use crate::error::ReceiptError;
use crate::media::save_download;
use crate::output::{DownloadLinks, ProcessedReceipt};
use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::BytesRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::Json;
use serde_json::Value;
use tracing::{debug, info};

/// Multipart field carrying the receipt image.
pub const RECEIPT_FIELD: &str = "receipt";

static INDEX_HTML: &str = include_str!("../../static/index.html");

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Fallback for non-POST methods on the POST routes.
pub async fn method_not_allowed() -> ReceiptError {
    ReceiptError::MethodNotAllowed
}

/// `POST /process/`: read the `receipt` field, then extract and scan it.
///
/// The field is read chunk by chunk and rejected as soon as it passes
/// `max_upload_size`, so nothing oversized is buffered or staged.
pub async fn process_receipt(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessedReceipt>, ReceiptError> {
    let max = state.processor.config().max_upload_size;
    let mut multipart = multipart.map_err(|rejection| ReceiptError::InvalidUpload {
        status: rejection.status(),
        detail: rejection.body_text(),
    })?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e, max))?
    {
        if field.name() != Some(RECEIPT_FIELD) {
            continue;
        }
        // A `receipt` part without a filename is a form value, not a file.
        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!("Ignoring '{}' field without a filename", RECEIPT_FIELD);
            continue;
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| upload_error(e, max))? {
            if bytes.len() + chunk.len() > max {
                return Err(ReceiptError::FileTooLarge { max_bytes: max });
            }
            bytes.extend_from_slice(&chunk);
        }

        info!("Received '{}' ({} bytes)", file_name, bytes.len());
        let processed = state.processor.process_upload(Some(file_name), &bytes).await?;
        return Ok(Json(processed));
    }

    Err(ReceiptError::NoReceiptFile)
}

/// `POST /download/`: persist a receipt record and link to it.
pub async fn download_json(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<DownloadLinks>, ReceiptError> {
    let body = body.map_err(|rejection| ReceiptError::InvalidUpload {
        status: rejection.status(),
        detail: rejection.body_text(),
    })?;
    let record: Value =
        serde_json::from_slice(&body).map_err(|e| ReceiptError::InvalidJson(e.to_string()))?;

    let saved = save_download(state.processor.layout(), &record).await?;
    info!("Saved receipt record to {}", saved.path.display());

    Ok(Json(DownloadLinks {
        json_url: Some(saved.url),
        barcode_url: barcode_url(&record),
    }))
}

/// The record's `barcode_image`, unless it is empty-ish: null, false, zero,
/// or an empty string, array or object.
fn barcode_url(record: &Value) -> Option<Value> {
    let value = record.get("barcode_image")?;
    let empty = match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    };
    (!empty).then(|| value.clone())
}

fn upload_error(err: MultipartError, max: usize) -> ReceiptError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ReceiptError::FileTooLarge { max_bytes: max }
    } else {
        ReceiptError::InvalidUpload {
            status,
            detail: err.body_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn barcode_url_echoes_present_values() {
        assert_eq!(
            barcode_url(&json!({"barcode_image": "/media/barcodes/b.png"})),
            Some(json!("/media/barcodes/b.png"))
        );
    }

    #[test]
    fn barcode_url_skips_empty_values() {
        assert_eq!(barcode_url(&json!({})), None);
        assert_eq!(barcode_url(&json!({"barcode_image": null})), None);
        assert_eq!(barcode_url(&json!({"barcode_image": ""})), None);
        assert_eq!(barcode_url(&json!({"barcode_image": false})), None);
        assert_eq!(barcode_url(&json!([1, 2])), None);
    }

    #[test]
    fn barcode_url_skips_zero_and_empty_containers() {
        assert_eq!(barcode_url(&json!({"barcode_image": 0})), None);
        assert_eq!(barcode_url(&json!({"barcode_image": 0.0})), None);
        assert_eq!(barcode_url(&json!({"barcode_image": []})), None);
        assert_eq!(barcode_url(&json!({"barcode_image": {}})), None);
    }

    #[test]
    fn barcode_url_echoes_other_truthy_values() {
        assert_eq!(barcode_url(&json!({"barcode_image": true})), Some(json!(true)));
        assert_eq!(barcode_url(&json!({"barcode_image": 7})), Some(json!(7)));
        assert_eq!(
            barcode_url(&json!({"barcode_image": ["/media/barcodes/b.png"]})),
            Some(json!(["/media/barcodes/b.png"]))
        );
    }

    #[test]
    fn index_page_has_upload_form() {
        assert!(INDEX_HTML.contains("name=\"receipt\""));
    }
}
