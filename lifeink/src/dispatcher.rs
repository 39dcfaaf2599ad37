use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::backend::{Backend, BackendError, EnhanceBackend};
use crate::prompts::PromptRegistry;
use crate::rate_limiter::{RateLimitError, RateLimiter};
use crate::settings::{ConfigError, ProviderSelection, Settings, SettingsSource};

const INSTRUCTION_SEPARATOR: &str = ":\n\n";

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid prompt ID `{0}`")]
    PromptNotFound(String),
    #[error("Invalid LLM provider selected: `{0}`")]
    Provider(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

/// Prompt text, separator, raw input. No templating beyond concatenation.
pub fn build_instruction(prompt: &str, text: &str) -> String {
    format!("{prompt}{INSTRUCTION_SEPARATOR}{text}")
}

/// Routes enhancement requests through the shared rate limiter.
#[derive(Clone)]
pub struct Dispatcher {
    settings: Arc<dyn SettingsSource>,
    limiter: Arc<RateLimiter>,
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        limiter: Arc<RateLimiter>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            settings,
            limiter,
            client,
        }
    }

    /// Runs on the blocking pool: the file store touches the disk and the OS keyring.
    pub async fn load_settings(&self) -> Result<Settings, ConfigError> {
        load_settings(Arc::clone(&self.settings)).await
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Settings are read inside the limited task, so a request sees whatever
    /// configuration is current when it actually starts.
    pub async fn enhance(&self, prompt_id: &str, text: &str) -> Result<String, EnhanceError> {
        let settings = Arc::clone(&self.settings);
        let client = self.client.clone();
        let prompt_id = prompt_id.to_string();
        let text = text.to_string();

        self.limiter
            .submit(move || async move {
                enhance_with_llm(settings, client, &prompt_id, &text).await
            })
            .await?
    }
}

async fn load_settings(source: Arc<dyn SettingsSource>) -> Result<Settings, ConfigError> {
    tokio::task::spawn_blocking(move || source.load())
        .await
        .map_err(|err| ConfigError::Io(format!("settings load was interrupted: {err}")))?
}

async fn enhance_with_llm(
    source: Arc<dyn SettingsSource>,
    client: reqwest::Client,
    prompt_id: &str,
    text: &str,
) -> Result<String, EnhanceError> {
    let settings = load_settings(source).await?;
    let selection = settings.provider();
    if selection == ProviderSelection::Unset {
        return Err(ConfigError::MissingProvider.into());
    }

    let registry = PromptRegistry::new(&settings.custom_prompts);
    let prompt = registry
        .resolve(prompt_id)
        .ok_or_else(|| EnhanceError::PromptNotFound(prompt_id.to_string()))?;
    let instruction = build_instruction(&prompt.prompt, text);

    let provider = match selection {
        ProviderSelection::Selected(provider) => provider,
        ProviderSelection::Unknown(value) => return Err(EnhanceError::Provider(value)),
        ProviderSelection::Unset => return Err(ConfigError::MissingProvider.into()),
    };

    let backend = Backend::from_settings(provider, &settings, client)?;
    info!(provider = provider.id(), prompt_id, "dispatching text enhancement");
    Ok(backend.enhance(&instruction).await?)
}
