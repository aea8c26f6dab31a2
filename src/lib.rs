//! # receipt-scan
//!
//! Extract structured data from receipt photos with Vision Language Models,
//! and regenerate any barcode printed on the receipt as a clean image.
//!
//! ## Why this crate?
//!
//! Receipt OCR pipelines built on template matching break on every new store
//! layout. Here the photo goes to a VLM together with a fixed JSON schema
//! prompt, and the model reads it the way a person would. In parallel, the
//! barcode on the receipt is decoded and re-rendered so it can be scanned
//! again from a screen.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (multipart `receipt`)
//!  │
//!  ├─ 1. Input    size check, image sniffing, stage under media/receipts/
//!  ├─ 2. Extract  base64 → VLM → lenient JSON parse      ┐ concurrent,
//!  ├─ 3. Barcode  decode → Code 128 → media/barcodes/     ┘ each with a timeout
//!  └─ 4. Merge    record + barcode_detected/number/image, staged file removed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt_scan::{ReceiptProcessor, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ServiceConfig::builder().media_root("media").build()?;
//!     let processor = ReceiptProcessor::from_config(config)?;
//!     let receipt = processor.process_file("receipt.jpg".as_ref()).await?;
//!     println!("{}", serde_json::to_string_pretty(&receipt)?);
//!     Ok(())
//! }
//! ```
//!
//! To run the HTTP service instead, pass the config to [`server::serve`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt-scan` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{BarcodeError, ReceiptError};
pub use media::MediaLayout;
pub use output::{
    Amount, BarcodeResult, DownloadLinks, ExtractionOutcome, ItemEntry, LineItem, ProcessedReceipt,
    ReceiptRecord,
};
pub use pipeline::barcode::{BarcodeScanner, RxingScanner};
pub use pipeline::llm::{LlmReceiptModel, ModelReply, ReceiptModel};
pub use process::ReceiptProcessor;
