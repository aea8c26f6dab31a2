//! Configuration for the receipt-scan service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. The HTTP server, the CLI `scan` command and
//! the tests share the same struct, so a knob added here is available
//! everywhere at once.

use crate::error::ReceiptError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default vision model when an OpenAI key is present and nothing else is chosen.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for receipt extraction and the HTTP service.
///
/// Built via [`ServiceConfig::builder()`] or using
/// [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use receipt_scan::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .media_root("/var/lib/receipt-scan/media")
///     .max_upload_size(5 * 1024 * 1024)
///     .task_timeout_secs(20)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Socket address the HTTP server listens on. Default: `127.0.0.1:8000`.
    pub bind: SocketAddr,

    /// Directory served publicly under [`Self::media_url`]. Default: `media`.
    ///
    /// Uploads are staged in `receipts/`, regenerated barcodes land in
    /// `barcodes/` and downloadable records in `downloads/`.
    pub media_root: PathBuf,

    /// URL prefix the media root is mounted at. Default: `/media`.
    pub media_url: String,

    /// Largest accepted upload in bytes. Default: 10 MiB.
    ///
    /// Phone photos of receipts are typically 2–6 MB. Vision APIs reject
    /// images above ~20 MB, so anything near that is refused up front.
    pub max_upload_size: usize,

    /// Wall-clock limit for each of the two background tasks (model call,
    /// barcode scan), in seconds. Default: 30.
    pub task_timeout_secs: u64,

    /// LLM model identifier, e.g. "gpt-4o", "claude-sonnet-4-20250514".
    /// If None, uses [`DEFAULT_MODEL`] or the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the completion. Default: 0.1.
    ///
    /// Extraction is transcription, not writing; a low temperature keeps the
    /// model faithful to the printed numbers.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    ///
    /// A long supermarket receipt with 60 line items needs roughly 1 500
    /// output tokens of JSON.
    pub max_tokens: usize,

    /// Ask the provider for a JSON object response (`response_format:
    /// json_object`). Default: true. Turn off for providers that reject the
    /// option; the reply parser tolerates fenced JSON either way.
    pub json_mode: bool,

    /// Custom extraction prompt. If None, uses [`crate::prompts::RECEIPT_EXTRACTION_PROMPT`].
    pub system_prompt: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            media_root: PathBuf::from("media"),
            media_url: "/media".to_string(),
            max_upload_size: 10 * 1024 * 1024,
            task_timeout_secs: 30,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            json_mode: true,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind", &self.bind)
            .field("media_root", &self.media_root)
            .field("media_url", &self.media_url)
            .field("max_upload_size", &self.max_upload_size)
            .field("task_timeout_secs", &self.task_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("json_mode", &self.json_mode)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Per-task timeout as a [`Duration`].
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// The prompt sent with every receipt image.
    pub fn prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(crate::prompts::RECEIPT_EXTRACTION_PROMPT)
    }
}

/// Builder for [`ServiceConfig`].
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.bind = addr;
        self
    }

    pub fn media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.media_root = root.into();
        self
    }

    pub fn media_url(mut self, url: impl Into<String>) -> Self {
        self.config.media_url = url.into();
        self
    }

    pub fn max_upload_size(mut self, bytes: usize) -> Self {
        self.config.max_upload_size = bytes;
        self
    }

    pub fn task_timeout_secs(mut self, secs: u64) -> Self {
        self.config.task_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn json_mode(mut self, on: bool) -> Self {
        self.config.json_mode = on;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ReceiptError> {
        let c = &self.config;
        if c.max_upload_size == 0 {
            return Err(ReceiptError::InvalidConfig(
                "Maximum upload size must be ≥ 1 byte".into(),
            ));
        }
        if c.task_timeout_secs == 0 {
            return Err(ReceiptError::InvalidConfig(
                "Task timeout must be ≥ 1 second".into(),
            ));
        }
        if !c.media_url.starts_with('/') || c.media_url.trim_end_matches('/').is_empty() {
            return Err(ReceiptError::InvalidConfig(format!(
                "Media URL must be a non-root path starting with '/', got {:?}",
                c.media_url
            )));
        }
        if !(0.0..=2.0).contains(&c.temperature) {
            return Err(ReceiptError::InvalidConfig(format!(
                "Temperature must be 0.0–2.0, got {}",
                c.temperature
            )));
        }
        if c.max_tokens == 0 {
            return Err(ReceiptError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::builder().build().expect("defaults build");
        assert_eq!(config.max_upload_size, 10 * 1024 * 1024);
        assert_eq!(config.task_timeout(), Duration::from_secs(30));
        assert_eq!(config.media_url, "/media");
        assert_eq!(config.bind.port(), 8000);
    }

    #[test]
    fn rejects_zero_upload_size() {
        let err = ServiceConfig::builder().max_upload_size(0).build().unwrap_err();
        assert!(matches!(err, ReceiptError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(ServiceConfig::builder().task_timeout_secs(0).build().is_err());
    }

    #[test]
    fn rejects_relative_media_url() {
        let err = ServiceConfig::builder().media_url("media").build().unwrap_err();
        assert!(err.to_string().contains("starting with '/'"), "got: {err}");
        assert!(ServiceConfig::builder().media_url("/").build().is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        assert!(ServiceConfig::builder().temperature(3.5).build().is_err());
        assert!(ServiceConfig::builder().temperature(0.0).build().is_ok());
    }

    #[test]
    fn prompt_override() {
        let config = ServiceConfig::builder()
            .system_prompt("Return {} only.")
            .build()
            .unwrap();
        assert_eq!(config.prompt(), "Return {} only.");
        assert!(ServiceConfig::default()
            .prompt()
            .contains("Total Amount"));
    }

    #[test]
    fn debug_hides_provider() {
        let dbg = format!("{:?}", ServiceConfig::default());
        assert!(dbg.contains("ServiceConfig"));
        assert!(dbg.contains("max_upload_size"));
    }
}
