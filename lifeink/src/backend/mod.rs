pub mod anthropic;
pub mod ollama;

use async_trait::async_trait;
use thiserror::Error;

use crate::settings::{ConfigError, DEFAULT_CUSTOM_ENDPOINT, Provider, Settings};

pub use anthropic::AnthropicBackend;
pub use ollama::{ModelInfo, OllamaBackend, format_size, list_models};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{provider} API request failed: {message}")]
    Api { provider: Provider, message: String },
    #[error("failed to reach {provider}: {message}")]
    Transport { provider: Provider, message: String },
    #[error("malformed {provider} response: {message}")]
    MalformedResponse { provider: Provider, message: String },
    #[error("invalid {provider} endpoint `{endpoint}`")]
    InvalidEndpoint { provider: Provider, endpoint: String },
}

/// A provider able to rewrite one fully-built instruction.
#[async_trait]
pub trait EnhanceBackend: Send + Sync {
    fn provider(&self) -> Provider;

    async fn enhance(&self, prompt: &str) -> Result<String, BackendError>;
}

pub enum Backend {
    Cloud(AnthropicBackend),
    Local(OllamaBackend),
}

impl Backend {
    pub fn from_settings(
        provider: Provider,
        settings: &Settings,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let model = settings.llm_model.trim();
        if model.is_empty() {
            return Err(ConfigError::MissingModel(provider));
        }

        let endpoint = endpoint_override(provider, settings).map(str::to_string);

        match provider {
            Provider::Anthropic => {
                AnthropicBackend::new(&settings.api_key, model, endpoint, client).map(Self::Cloud)
            }
            Provider::Ollama => Ok(Self::Local(OllamaBackend::new(model, endpoint, client))),
        }
    }
}

#[async_trait]
impl EnhanceBackend for Backend {
    fn provider(&self) -> Provider {
        match self {
            Self::Cloud(backend) => backend.provider(),
            Self::Local(backend) => backend.provider(),
        }
    }

    async fn enhance(&self, prompt: &str) -> Result<String, BackendError> {
        match self {
            Self::Cloud(backend) => backend.enhance(prompt).await,
            Self::Local(backend) => backend.enhance(prompt).await,
        }
    }
}

/// The configured custom endpoint, unless it is the stock local-server default
/// and the cloud provider is selected.
pub fn endpoint_override(provider: Provider, settings: &Settings) -> Option<&str> {
    let endpoint = settings.custom_endpoint()?;
    if provider == Provider::Anthropic && endpoint == DEFAULT_CUSTOM_ENDPOINT {
        return None;
    }
    Some(endpoint)
}
