//! LLM interaction: one chat completion per chunk.
//!
//! The extractor talks to a [`CompletionClient`], not to a provider
//! directly. Production code wraps an `edgequake_llm` provider in a
//! [`ProviderClient`]; tests supply a scripted client and count its calls.
//!
//! Retries do not live here. A single call either yields a [`Completion`]
//! or a transport error string; [`crate::pipeline::extract`] decides what
//! to do with it.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::{debug, warn};

/// Model used when a provider is named but no model is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Raw model answer plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A text-generation backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send one system + user exchange. `Err` carries a human-readable
    /// transport error (network, rate limit, provider failure).
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, String>;

    /// Model name for logs, when known.
    fn model(&self) -> Option<&str> {
        None
    }
}

/// Completion clients in the order they are tried for a chunk.
pub type ClientChain = Vec<Arc<dyn CompletionClient>>;

/// [`CompletionClient`] over an `edgequake_llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    model: Option<String>,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: build_options(temperature, max_tokens),
            model: None,
        }
    }

    /// Label the client with the model its provider serves.
    pub fn for_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let provider = resolve_provider(config)?;
        let client = Self::new(provider, config.temperature, config.max_tokens);
        Ok(match resolve_target(config) {
            Some((_, model)) => client.for_model(model),
            None => client,
        })
    }

    /// The configured client followed by one client per fallback model,
    /// all on the resolved provider.
    ///
    /// Fallback models need a provider name; with a fully auto-detected
    /// provider they are ignored with a warning.
    pub fn chain_from_config(config: &PipelineConfig) -> Result<ClientChain, PipelineError> {
        let mut chain: ClientChain = vec![Arc::new(Self::from_config(config)?)];
        if config.fallback_models.is_empty() {
            return Ok(chain);
        }
        let Some((provider_name, _)) = resolve_target(config) else {
            warn!(
                fallbacks = ?config.fallback_models,
                "provider was auto-detected, fallback models need a named provider and are ignored"
            );
            return Ok(chain);
        };
        for model in &config.fallback_models {
            let provider = create_provider(&provider_name, model)?;
            chain.push(Arc::new(
                Self::new(provider, config.temperature, config.max_tokens).for_model(model.clone()),
            ));
        }
        Ok(chain)
    }
}

#[async_trait]
impl CompletionClient for ProviderClient {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, String> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| e.to_string())?;
        debug!(
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "completion received"
        );
        Ok(Completion {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Provider name and model picked by the explicit settings, most specific
/// first. `None` means full auto-detection.
///
/// 1. **Named provider + model** (`config.provider_name`), the API key is
///    read from the provider's usual variable (`OPENAI_API_KEY`, ...).
/// 2. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
///    both set and non-empty.
/// 3. **OpenAI** whenever `OPENAI_API_KEY` is present, so machines with
///    several keys default to one predictable provider.
fn resolve_target(config: &PipelineConfig) -> Option<(String, String)> {
    let configured_model = || config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());

    if let Some(ref name) = config.provider_name {
        return Some((name.clone(), configured_model()));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Some((prov, model));
        }
    }

    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Some(("openai".to_string(), configured_model())),
        _ => None,
    }
}

/// Resolve the LLM provider: the explicit chain of [`resolve_target`],
/// then full auto-detection via [`ProviderFactory::from_env`].
///
/// A pre-built provider skips this entirely: hand it to
/// [`ProviderClient::new`].
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some((provider, model)) = resolve_target(config) {
        return create_provider(&provider, &model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_from_config_defaults() {
        let config = PipelineConfig::default();
        let opts = build_options(config.temperature, config.max_tokens);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(2048));
    }

    #[test]
    fn named_provider_uses_configured_model() {
        let config = PipelineConfig::builder()
            .provider_name("ollama")
            .model("llama3.2")
            .build()
            .unwrap();
        assert_eq!(
            resolve_target(&config),
            Some(("ollama".to_string(), "llama3.2".to_string()))
        );

        let config = PipelineConfig::builder().provider_name("openai").build().unwrap();
        assert_eq!(
            resolve_target(&config),
            Some(("openai".to_string(), DEFAULT_MODEL.to_string()))
        );
    }
}
