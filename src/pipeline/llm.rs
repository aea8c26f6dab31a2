//! VLM interaction: build the vision message and call the provider.
//!
//! The model is reached through the narrow [`ReceiptModel`] trait (prompt +
//! image → text) rather than `edgequake_llm::LLMProvider` directly, so the
//! upload path can run against a stub.
//!
//! No retries: the caller's timeout bounds the call.

use crate::config::{ServiceConfig, DEFAULT_MODEL};
use crate::error::ReceiptError;
use crate::output::ExtractionOutcome;
use crate::pipeline::postprocess::parse_reply;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Text reply from a vision model plus token accounting.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anything that can read a receipt image given a prompt.
pub trait ReceiptModel: Send + Sync {
    fn read_receipt<'a>(
        &'a self,
        prompt: &'a str,
        image: ImageData,
    ) -> BoxFuture<'a, Result<ModelReply, ReceiptError>>;
}

/// [`ReceiptModel`] backed by an `edgequake-llm` provider.
pub struct LlmReceiptModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmReceiptModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ServiceConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ReceiptError> {
        let provider = resolve_provider(config)?;
        info!(
            "LLM provider resolved (provider: {:?}, model: {:?})",
            config.provider_name, config.model
        );
        Ok(Self::new(provider, config))
    }
}

impl ReceiptModel for LlmReceiptModel {
    fn read_receipt<'a>(
        &'a self,
        prompt: &'a str,
        image: ImageData,
    ) -> BoxFuture<'a, Result<ModelReply, ReceiptError>> {
        Box::pin(async move {
            // The prompt travels in the user turn together with the image,
            // as one multimodal message.
            let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];

            let response = self
                .provider
                .chat(&messages, Some(&self.options))
                .await
                .map_err(|e| ReceiptError::LlmApiError {
                    message: e.to_string(),
                })?;

            Ok::<_, ReceiptError>(ModelReply {
                content: response.content,
                input_tokens: response.prompt_tokens as usize,
                output_tokens: response.completion_tokens as usize,
            })
        })
    }
}

/// Run the extractor: one model call, then parse the reply.
///
/// Model/network failures are returned as `Err`; an unparseable reply is an
/// `Ok(ExtractionOutcome::ParseFailure)`.
pub async fn extract_receipt(
    model: &dyn ReceiptModel,
    prompt: &str,
    image: ImageData,
) -> Result<ExtractionOutcome, ReceiptError> {
    let start = Instant::now();
    let reply = model.read_receipt(prompt, image).await?;
    debug!(
        "Model reply: {} input tokens, {} output tokens, {} chars, {:?}",
        reply.input_tokens,
        reply.output_tokens,
        reply.content.len(),
        start.elapsed()
    );
    Ok(parse_reply(&reply.content))
}

/// Build `CompletionOptions` from the service config.
fn build_options(config: &ServiceConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        response_format: config.json_mode.then(|| "json_object".to_string()),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ReceiptError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ReceiptError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`): used as-is.
/// 2. **Named provider + model** (`config.provider_name`): the factory reads
///    the matching API key (`OPENAI_API_KEY`, …) from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present**: OpenAI with [`DEFAULT_MODEL`].
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ServiceConfig) -> Result<Arc<dyn LLMProvider>, ReceiptError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ReceiptError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
