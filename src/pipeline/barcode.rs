//! Barcode detection and regeneration.
//!
//! Receipt photos are skewed, creased and low-contrast; a barcode that
//! decodes is rarely one you would want to print. The detector therefore
//! decodes the first symbol on the receipt and renders the same text as a
//! fresh Code 128 image with no human-readable label, so the caller gets a
//! clean, scannable copy.
//!
//! Decoding and rendering are CPU-bound and run via `spawn_blocking`.
//! Every failure is non-fatal: it is logged and reported as "no barcode".

use crate::error::BarcodeError;
use crate::media::MediaLayout;
use crate::output::BarcodeResult;
use futures::future::BoxFuture;
use image::{GrayImage, Luma};
use rxing::{BarcodeFormat, DecodingHintDictionary, MultiFormatWriter, Writer};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pixel height of regenerated barcodes.
pub const BARCODE_HEIGHT: u32 = 120;

/// Minimum pixel width of regenerated barcodes. The writer scales modules
/// to an integer multiple at or above this.
pub const BARCODE_MIN_WIDTH: u32 = 400;

/// Anything that can find a barcode on a staged receipt and save a
/// regenerated copy under the media root.
pub trait BarcodeScanner: Send + Sync {
    fn scan<'a>(
        &'a self,
        image_path: &'a Path,
        layout: &'a MediaLayout,
    ) -> BoxFuture<'a, Option<BarcodeResult>>;
}

/// The rxing-backed scanner used by the service.
#[derive(Debug, Clone, Copy, Default)]
pub struct RxingScanner;

impl BarcodeScanner for RxingScanner {
    fn scan<'a>(
        &'a self,
        image_path: &'a Path,
        layout: &'a MediaLayout,
    ) -> BoxFuture<'a, Option<BarcodeResult>> {
        Box::pin(detect_and_regenerate_blocking(image_path, layout))
    }
}

/// Decode the first barcode in `image_path` and write a regenerated copy to
/// `barcodes/` under the media root.
///
/// Returns `None` when no barcode is found or anything goes wrong.
pub fn detect_and_regenerate(image_path: &Path, layout: &MediaLayout) -> Option<BarcodeResult> {
    match try_detect_and_regenerate(image_path, layout) {
        Ok(result) => {
            info!("Barcode detected: {:?} → {}", result.text, result.image_url);
            Some(result)
        }
        Err(BarcodeError::NotFound) => {
            debug!("No barcode in {}", image_path.display());
            None
        }
        Err(e) => {
            warn!("Barcode scan skipped: {}", e);
            None
        }
    }
}

/// Async wrapper running [`detect_and_regenerate`] on the blocking pool.
///
/// A panic inside the decoder is treated like any other failure.
pub async fn detect_and_regenerate_blocking(
    image_path: &Path,
    layout: &MediaLayout,
) -> Option<BarcodeResult> {
    let path = image_path.to_path_buf();
    let layout = layout.clone();
    match tokio::task::spawn_blocking(move || detect_and_regenerate(&path, &layout)).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Barcode task failed: {}", e);
            None
        }
    }
}

fn try_detect_and_regenerate(
    image_path: &Path,
    layout: &MediaLayout,
) -> Result<BarcodeResult, BarcodeError> {
    let text = decode_file(image_path)?;

    let file_name = format!("barcode_{}.png", Uuid::new_v4());
    let dir = layout.barcodes_dir();
    let out_path = dir.join(&file_name);

    std::fs::create_dir_all(&dir).map_err(|e| BarcodeError::SaveFailed {
        path: dir.clone(),
        detail: e.to_string(),
    })?;

    let rendered = render_code128(&text)?;
    rendered
        .save_with_format(&out_path, image::ImageFormat::Png)
        .map_err(|e| BarcodeError::SaveFailed {
            path: out_path.clone(),
            detail: e.to_string(),
        })?;

    Ok(BarcodeResult {
        text,
        image_url: layout.barcode_url(&file_name),
        image_path: out_path,
    })
}

/// Open an image, convert it to grayscale and decode the first symbol found.
pub fn decode_file(image_path: &Path) -> Result<String, BarcodeError> {
    let img = image::open(image_path).map_err(|e| BarcodeError::UnreadableImage {
        path: image_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    decode_luma(&img.to_luma8())
}

/// Decode the first symbol in a grayscale image.
pub fn decode_luma(gray: &GrayImage) -> Result<String, BarcodeError> {
    let (width, height) = gray.dimensions();
    // `helpers::detect_in_luma` passes height and width swapped to the
    // luminance source; go through the hints variant directly.
    let mut hints = DecodingHintDictionary::new();
    let result = rxing::helpers::detect_in_luma_with_hints(
        gray.as_raw().clone(),
        width,
        height,
        None,
        &mut hints,
    )
    .map_err(|_| BarcodeError::NotFound)?;
    let text = result.getText().to_string();
    if text.is_empty() {
        return Err(BarcodeError::NotFound);
    }
    Ok(text)
}

/// Render `text` as a label-free Code 128 barcode on a white background.
pub fn render_code128(text: &str) -> Result<GrayImage, BarcodeError> {
    let matrix = MultiFormatWriter::default()
        .encode(
            text,
            &BarcodeFormat::CODE_128,
            BARCODE_MIN_WIDTH as i32,
            BARCODE_HEIGHT as i32,
        )
        .map_err(|e| BarcodeError::EncodeFailed {
            text: text.to_string(),
            detail: e.to_string(),
        })?;

    let (width, height) = (matrix.getWidth(), matrix.getHeight());
    Ok(GrayImage::from_fn(width, height, |x, y| {
        if matrix.get(x, y) {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    }))
}
