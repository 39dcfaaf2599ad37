use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::{BackendError, EnhanceBackend};
use crate::settings::{ConfigError, Provider};

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/complete";
const MAX_TOKENS_TO_SAMPLE: u32 = 1000;
const TEMPERATURE: f32 = 0.7;
const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Serialize)]
pub struct CompleteRequest<'a> {
    pub prompt: String,
    pub model: &'a str,
    pub max_tokens_to_sample: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    completion: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<Value>,
}

/// Legacy text-completion API client.
pub struct AnthropicBackend {
    api_key: String,
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(
        api_key: &str,
        model: &str,
        endpoint: Option<String>,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ConfigError::MissingCredential(Provider::Anthropic));
        }

        let model = model.trim();
        if model.is_empty() {
            return Err(ConfigError::MissingModel(Provider::Anthropic));
        }

        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(&self, prompt: &str) -> CompleteRequest<'_> {
        CompleteRequest {
            prompt: wrap_prompt(prompt),
            model: &self.model,
            max_tokens_to_sample: MAX_TOKENS_TO_SAMPLE,
            temperature: TEMPERATURE,
        }
    }
}

pub fn wrap_prompt(prompt: &str) -> String {
    format!("Human: {prompt}\n\nAssistant:")
}

#[async_trait]
impl EnhanceBackend for AnthropicBackend {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn enhance(&self, prompt: &str) -> Result<String, BackendError> {
        let request = self.build_request(prompt);
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| BackendError::Transport {
                provider: Provider::Anthropic,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "anthropic request rejected");
            return Err(BackendError::Api {
                provider: Provider::Anthropic,
                message: extract_error_message(&body),
            });
        }

        let parsed: CompleteResponse =
            response
                .json()
                .await
                .map_err(|err| BackendError::MalformedResponse {
                    provider: Provider::Anthropic,
                    message: err.to_string(),
                })?;
        Ok(parsed.completion)
    }
}

/// Pulls the provider's message out of an error body: `{"error": "..."}`
/// or `{"error": {"message": "..."}}`.
fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    match parsed.error {
        Some(Value::String(message)) if !message.trim().is_empty() => message,
        Some(Value::Object(object)) => object
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        _ => UNKNOWN_ERROR.to_string(),
    }
}
