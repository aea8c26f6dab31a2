//! Pipeline stages for receipt extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the HTTP layer stays a thin shell around them.
//!
//! ## Data Flow
//!
//! ```text
//!                   ┌─▶ encode ──▶ llm ──▶ postprocess ─┐
//! input ──▶ staged ─┤   (base64)  (VLM)   (JSON parse)  ├─▶ merged record
//! (upload)  file    └─▶ barcode ────────────────────────┘
//!                       (decode + Code 128 re-render)
//! ```
//!
//! 1. [`input`]: validate image bytes and stage them as a self-deleting
//!    temp file, or resolve a CLI path/URL
//! 2. [`encode`]: base64-wrap the image for the multimodal request body
//! 3. [`llm`]: the single VLM call; the only stage with network I/O
//! 4. [`postprocess`]: strip fences, parse JSON, read the record leniently
//! 5. [`barcode`]: decode the first symbol and render a clean copy; runs in
//!    `spawn_blocking` next to steps 2–4

pub mod barcode;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
