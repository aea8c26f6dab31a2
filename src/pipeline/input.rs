//! Input handling: stage uploads on disk and resolve CLI inputs.
//!
//! ## Why a temp file at all?
//!
//! The barcode detector and the model call both read the receipt from a
//! path, and they run at the same time. Staging the upload once as a
//! `NamedTempFile` under `<media_root>/receipts/` gives both a path, and the
//! file is deleted when [`StoredUpload`] is dropped: on success, on error and
//! on timeout alike, without a cleanup call on every return path.
//!
//! We check image magic bytes before anything is written so callers get a
//! 400 rather than a model bill for a PDF or a zip file.

use crate::error::ReceiptError;
use image::ImageFormat;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

/// Identify the image format from magic bytes.
///
/// Accepts the formats phone cameras and scanners produce and that vision
/// APIs accept as data URLs.
pub fn sniff_image(bytes: &[u8]) -> Result<ImageFormat, ReceiptError> {
    if bytes.is_empty() {
        return Err(ReceiptError::UnsupportedImage {
            detail: "file is empty".into(),
        });
    }
    let format = image::guess_format(bytes).map_err(|_| ReceiptError::UnsupportedImage {
        detail: format!("unrecognised file signature {:02x?}", &bytes[..bytes.len().min(4)]),
    })?;
    match format {
        ImageFormat::Jpeg
        | ImageFormat::Png
        | ImageFormat::WebP
        | ImageFormat::Gif
        | ImageFormat::Bmp
        | ImageFormat::Tiff => Ok(format),
        other => Err(ReceiptError::UnsupportedImage {
            detail: format!("{other:?} images are not supported"),
        }),
    }
}

/// An upload staged under the receipts directory. Deleted on drop.
#[derive(Debug)]
pub struct StoredUpload {
    file: NamedTempFile,
    original_name: Option<String>,
    format: ImageFormat,
    size: usize,
}

impl StoredUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// File name as sent by the client, for logging only.
    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Delete the staged file now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<(), ReceiptError> {
        let path = self.file.path().to_path_buf();
        self.file
            .close()
            .map_err(|e| ReceiptError::StorageFailed { path, source: e })
    }
}

/// Validate `bytes` as an image and stage it in `receipts_dir`.
///
/// The client-supplied name never reaches the filesystem; the staged file is
/// `receipt_<random>.<ext>` with the extension taken from the sniffed format.
pub fn store_upload(
    receipts_dir: &Path,
    original_name: Option<String>,
    bytes: &[u8],
) -> Result<StoredUpload, ReceiptError> {
    let format = sniff_image(bytes)?;

    std::fs::create_dir_all(receipts_dir).map_err(|e| ReceiptError::StorageFailed {
        path: receipts_dir.to_path_buf(),
        source: e,
    })?;

    let suffix = format!(".{}", format.extensions_str().first().copied().unwrap_or("img"));
    let mut file = tempfile::Builder::new()
        .prefix("receipt_")
        .suffix(&suffix)
        .tempfile_in(receipts_dir)
        .map_err(|e| ReceiptError::StorageFailed {
            path: receipts_dir.to_path_buf(),
            source: e,
        })?;

    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| ReceiptError::StorageFailed {
            path: file.path().to_path_buf(),
            source: e,
        })?;

    debug!(
        "Staged upload {:?} as {} ({} bytes, {:?})",
        original_name,
        file.path().display(),
        bytes.len(),
        format
    );

    Ok(StoredUpload {
        file,
        original_name,
        format,
        size: bytes.len(),
    })
}

// ── CLI input ────────────────────────────────────────────────────────────

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; image downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the image regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a CLI argument to a local image file.
///
/// If the input is a URL, download it to a temporary directory.
/// Either way the bytes must carry a supported image signature.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ReceiptError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(path_str: &str) -> Result<ResolvedInput, ReceiptError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ReceiptError::FileNotFound { path: path.clone() })?;
    sniff_image(&bytes)?;

    debug!("Resolved local image: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ReceiptError> {
    info!("Downloading receipt image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ReceiptError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ReceiptError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ReceiptError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ReceiptError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ReceiptError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let format = sniff_image(&bytes)?;
    let filename = extract_filename(url, format);

    let temp_dir = TempDir::new().map_err(|e| ReceiptError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ReceiptError::StorageFailed {
            path: file_path.clone(),
            source: e,
        })?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment if it looks like a file name, else `receipt.<ext>`.
fn extract_filename(url: &str, format: ImageFormat) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    format!(
        "receipt.{}",
        format.extensions_str().first().copied().unwrap_or("img")
    )
}
