//! Receipt processing: the fan-out/merge step behind the upload endpoint.
//!
//! ```text
//!             ┌─ timeout(encode → VLM → parse) ─┐
//! staged file ┤                                  ├─▶ ProcessedReceipt
//!             └─ timeout(spawn_blocking barcode) ┘
//! ```
//!
//! Both branches start together and each gets the full task timeout. The
//! first error (model failure or either timeout) ends the wait; a barcode
//! task still running on the blocking pool is abandoned, not interrupted.

use crate::config::ServiceConfig;
use crate::error::ReceiptError;
use crate::media::MediaLayout;
use crate::output::{ExtractionOutcome, ProcessedReceipt};
use crate::pipeline::barcode::{BarcodeScanner, RxingScanner};
use crate::pipeline::llm::{LlmReceiptModel, ReceiptModel};
use crate::pipeline::{encode, input, llm};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Shared, cheaply clonable processor. One per service.
#[derive(Clone)]
pub struct ReceiptProcessor {
    model: Arc<dyn ReceiptModel>,
    scanner: Arc<dyn BarcodeScanner>,
    config: Arc<ServiceConfig>,
    layout: MediaLayout,
}

impl ReceiptProcessor {
    /// Build a processor around an existing model.
    pub fn new(model: Arc<dyn ReceiptModel>, config: ServiceConfig) -> Self {
        let layout = MediaLayout::new(config.media_root.clone(), config.media_url.clone());
        Self {
            model,
            scanner: Arc::new(RxingScanner),
            config: Arc::new(config),
            layout,
        }
    }

    /// Replace the barcode scanner.
    pub fn with_scanner(mut self, scanner: Arc<dyn BarcodeScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Build a processor backed by the LLM provider `config` resolves to.
    pub fn from_config(config: ServiceConfig) -> Result<Self, ReceiptError> {
        let model = LlmReceiptModel::from_config(&config)?;
        Ok(Self::new(Arc::new(model), config))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn layout(&self) -> &MediaLayout {
        &self.layout
    }

    /// Validate, stage and process an uploaded receipt.
    ///
    /// The staged file is removed before this returns, whatever the outcome.
    pub async fn process_upload(
        &self,
        original_name: Option<String>,
        bytes: &[u8],
    ) -> Result<ProcessedReceipt, ReceiptError> {
        if bytes.len() > self.config.max_upload_size {
            return Err(ReceiptError::FileTooLarge {
                max_bytes: self.config.max_upload_size,
            });
        }

        let upload = input::store_upload(&self.layout.receipts_dir(), original_name, bytes)?;
        info!(
            "Processing receipt {:?} ({} bytes, {:?})",
            upload.original_name().unwrap_or("<unnamed>"),
            upload.size(),
            upload.format()
        );

        let result = self.process_file(upload.path()).await;

        if let Err(e) = upload.close() {
            warn!("Could not remove staged upload: {}", e);
        }
        result
    }

    /// Run the extractor and the barcode detector on `path` concurrently and
    /// merge their results.
    pub async fn process_file(&self, path: &Path) -> Result<ProcessedReceipt, ReceiptError> {
        let start = Instant::now();
        let limit = self.config.task_timeout();
        let secs = self.config.task_timeout_secs;

        let extraction = async {
            match timeout(limit, self.extract(path)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Receipt extraction exceeded {}s", secs);
                    Err(ReceiptError::Timeout { secs })
                }
            }
        };

        let barcode = async {
            timeout(limit, self.scanner.scan(path, &self.layout))
                .await
                .map_err(|_| {
                    warn!("Barcode scan exceeded {}s", secs);
                    ReceiptError::Timeout { secs }
                })
        };

        let (extraction, barcode) = tokio::try_join!(extraction, barcode)?;

        debug!(
            "Processed {} in {:?} (barcode: {})",
            path.display(),
            start.elapsed(),
            barcode.is_some()
        );
        Ok(ProcessedReceipt::merge(extraction, barcode))
    }

    async fn extract(&self, path: &Path) -> Result<ExtractionOutcome, ReceiptError> {
        let image = encode::encode_receipt_file(path).await?;
        llm::extract_receipt(self.model.as_ref(), self.config.prompt(), image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::ModelReply;
    use edgequake_llm::ImageData;
    use futures::future::BoxFuture;
    use std::io::Cursor;
    use std::time::Duration;

    struct Scripted {
        reply: Result<&'static str, &'static str>,
        delay: Duration,
    }

    impl ReceiptModel for Scripted {
        fn read_receipt<'a>(
            &'a self,
            _prompt: &'a str,
            _image: ImageData,
        ) -> BoxFuture<'a, Result<ModelReply, ReceiptError>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                match self.reply {
                    Ok(text) => Ok(ModelReply {
                        content: text.to_string(),
                        ..Default::default()
                    }),
                    Err(msg) => Err(ReceiptError::LlmApiError {
                        message: msg.to_string(),
                    }),
                }
            })
        }
    }

    struct SlowScanner(Duration);

    impl BarcodeScanner for SlowScanner {
        fn scan<'a>(
            &'a self,
            _image_path: &'a Path,
            _layout: &'a MediaLayout,
        ) -> BoxFuture<'a, Option<crate::output::BarcodeResult>> {
            Box::pin(async move {
                tokio::time::sleep(self.0).await;
                None
            })
        }
    }

    fn processor(model: Scripted, root: &Path, timeout_secs: u64) -> ReceiptProcessor {
        let config = ServiceConfig::builder()
            .media_root(root)
            .task_timeout_secs(timeout_secs)
            .max_upload_size(1024 * 1024)
            .build()
            .unwrap();
        ReceiptProcessor::new(Arc::new(model), config)
    }

    fn blank_png() -> Vec<u8> {
        let img = image::GrayImage::from_pixel(64, 64, image::Luma([255u8]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn receipts_left(root: &Path) -> usize {
        std::fs::read_dir(root.join("receipts"))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn merges_record_without_barcode() {
        let tmp = tempfile::tempdir().unwrap();
        let p = processor(
            Scripted {
                reply: Ok(r#"{"Store Name": "Kiosk", "Total Amount": "4.20"}"#),
                delay: Duration::ZERO,
            },
            tmp.path(),
            5,
        );

        let out = p.process_upload(Some("r.png".into()), &blank_png()).await.unwrap();
        assert!(!out.barcode_detected);
        assert_eq!(out.barcode_number, None);
        assert_eq!(out.barcode_image, None);
        let record = out.extraction.record().unwrap();
        assert_eq!(record.store_name.as_deref(), Some("Kiosk"));
        assert_eq!(receipts_left(tmp.path()), 0);
    }

    #[tokio::test]
    async fn parse_failure_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let p = processor(
            Scripted {
                reply: Ok("I cannot help with that."),
                delay: Duration::ZERO,
            },
            tmp.path(),
            5,
        );
        let out = p.process_upload(None, &blank_png()).await.unwrap();
        assert_eq!(out.extraction, ExtractionOutcome::parse_failure());
    }

    #[tokio::test]
    async fn model_error_aborts_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let p = processor(
            Scripted {
                reply: Err("quota exceeded"),
                delay: Duration::ZERO,
            },
            tmp.path(),
            5,
        );
        let err = p.process_upload(None, &blank_png()).await.unwrap_err();
        assert_eq!(err.to_string(), "Error processing receipt: quota exceeded");
        assert_eq!(receipts_left(tmp.path()), 0);
    }

    #[tokio::test]
    async fn slow_model_times_out_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let p = processor(
            Scripted {
                reply: Ok("{}"),
                delay: Duration::from_secs(5),
            },
            tmp.path(),
            1,
        );
        let err = p.process_upload(None, &blank_png()).await.unwrap_err();
        assert!(matches!(err, ReceiptError::Timeout { secs: 1 }));
        assert_eq!(receipts_left(tmp.path()), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let p = processor(
            Scripted {
                reply: Ok("{}"),
                delay: Duration::ZERO,
            },
            tmp.path(),
            5,
        );
        let big = vec![0u8; 1024 * 1024 + 1];
        let err = p.process_upload(None, &big).await.unwrap_err();
        assert!(matches!(err, ReceiptError::FileTooLarge { .. }));
        assert!(!tmp.path().join("receipts").exists());
    }

    #[tokio::test]
    async fn extraction_and_scan_run_concurrently() {
        let tmp = tempfile::tempdir().unwrap();
        let p = processor(
            Scripted {
                reply: Ok(r#"{"Store Name": "Kiosk"}"#),
                delay: Duration::from_millis(800),
            },
            tmp.path(),
            1,
        )
        .with_scanner(Arc::new(SlowScanner(Duration::from_millis(800))));

        let start = Instant::now();
        let out = p.process_upload(None, &blank_png()).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(1500), "{:?}", start.elapsed());
        assert_eq!(out.extraction.record().unwrap().store_name.as_deref(), Some("Kiosk"));
        assert!(!out.barcode_detected);
    }

    #[tokio::test]
    async fn slow_scan_times_out_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let p = processor(
            Scripted {
                reply: Ok("{}"),
                delay: Duration::ZERO,
            },
            tmp.path(),
            1,
        )
        .with_scanner(Arc::new(SlowScanner(Duration::from_secs(5))));

        let err = p.process_upload(None, &blank_png()).await.unwrap_err();
        assert!(matches!(err, ReceiptError::Timeout { secs: 1 }));
        assert_eq!(receipts_left(tmp.path()), 0);
    }
}
