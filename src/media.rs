//! Media root layout and the downloadable-record writer.
//!
//! ```text
//! <media_root>/
//!  ├─ receipts/    uploads, alive only for the duration of one request
//!  ├─ barcodes/    barcode_<uuid>.png   regenerated barcode images
//!  └─ downloads/   receipt_data_<uuid>.json   records saved for download
//! ```
//!
//! Everything under the root is served publicly under the media URL, so the
//! URL of a file is the media URL joined with its path relative to the root.

use crate::error::ReceiptError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const RECEIPTS_DIR: &str = "receipts";
const BARCODES_DIR: &str = "barcodes";
const DOWNLOADS_DIR: &str = "downloads";

/// Paths and URLs under the media root.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    root: PathBuf,
    url_prefix: String,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into();
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL prefix without a trailing slash, e.g. `/media`.
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.root.join(RECEIPTS_DIR)
    }

    pub fn barcodes_dir(&self) -> PathBuf {
        self.root.join(BARCODES_DIR)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    /// URL for a file in `barcodes/`.
    pub fn barcode_url(&self, file_name: &str) -> String {
        format!("{}/{}/{}", self.url_prefix, BARCODES_DIR, file_name)
    }

    /// URL for a file in `downloads/`.
    pub fn download_url(&self, file_name: &str) -> String {
        format!("{}/{}/{}", self.url_prefix, DOWNLOADS_DIR, file_name)
    }

    /// Create the three sub-directories. Idempotent.
    pub fn ensure_dirs(&self) -> Result<(), ReceiptError> {
        for dir in [self.receipts_dir(), self.barcodes_dir(), self.downloads_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| ReceiptError::StorageFailed { path: dir, source: e })?;
        }
        Ok(())
    }
}

/// A record written to `downloads/`.
#[derive(Debug, Clone)]
pub struct SavedDownload {
    pub path: PathBuf,
    pub url: String,
}

/// Write `record` verbatim to `downloads/receipt_data_<uuid>.json`.
///
/// Pretty-printed with 4-space indentation. Uses atomic write (temp file +
/// rename) so the public URL never serves a half-written file.
pub async fn save_download(
    layout: &MediaLayout,
    record: &Value,
) -> Result<SavedDownload, ReceiptError> {
    let dir = layout.downloads_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ReceiptError::StorageFailed {
            path: dir.clone(),
            source: e,
        })?;

    let file_name = format!("receipt_data_{}.json", Uuid::new_v4());
    let path = dir.join(&file_name);
    let body = to_pretty_json(record).map_err(|e| ReceiptError::Internal(e.to_string()))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &body)
        .await
        .map_err(|e| ReceiptError::StorageFailed {
            path: path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| ReceiptError::StorageFailed {
            path: path.clone(),
            source: e,
        })?;

    debug!("Saved download {} ({} bytes)", path.display(), body.len());

    Ok(SavedDownload {
        url: layout.download_url(&file_name),
        path,
    })
}

/// Serialise with 4-space indentation.
fn to_pretty_json(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(value, &mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}
