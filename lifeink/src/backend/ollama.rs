use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::backend::{BackendError, EnhanceBackend};
use crate::settings::Provider;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/generate";
pub const FALLBACK_MODEL: &str = "llama2";
const TAGS_PATH: &str = "/api/tags";
const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Local model server client (non-streaming generate endpoint).
pub struct OllamaBackend {
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(model: &str, endpoint: Option<String>, client: reqwest::Client) -> Self {
        let model = match model.trim() {
            "" => FALLBACK_MODEL,
            trimmed => trimmed,
        };

        Self {
            model: model.to_string(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EnhanceBackend for OllamaBackend {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    async fn enhance(&self, prompt: &str) -> Result<String, BackendError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| BackendError::Transport {
                provider: Provider::Ollama,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Api {
                provider: Provider::Ollama,
                message: format!("status {}", status.as_u16()),
            });
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|err| BackendError::MalformedResponse {
                    provider: Provider::Ollama,
                    message: err.to_string(),
                })?;
        debug!(chars = parsed.response.chars().count(), "ollama raw response received");
        Ok(parsed.response)
    }
}

/// `<origin of endpoint>/api/tags`.
pub fn tags_url(endpoint: &str) -> Result<Url, BackendError> {
    let invalid = || BackendError::InvalidEndpoint {
        provider: Provider::Ollama,
        endpoint: endpoint.to_string(),
    };

    let parsed = Url::parse(endpoint).map_err(|_| invalid())?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return Err(invalid());
    }

    Url::parse(&origin.ascii_serialization())
        .and_then(|base| base.join(TAGS_PATH))
        .map_err(|_| invalid())
}

/// Models installed on the local server, sorted by name.
pub async fn list_models(
    client: &reqwest::Client,
    endpoint: &str,
) -> Result<Vec<ModelInfo>, BackendError> {
    let url = tags_url(endpoint)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| BackendError::Transport {
            provider: Provider::Ollama,
            message: err.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Api {
            provider: Provider::Ollama,
            message: format!("Failed to fetch models ({})", status.as_u16()),
        });
    }

    let mut tags: TagsResponse =
        response
            .json()
            .await
            .map_err(|err| BackendError::MalformedResponse {
                provider: Provider::Ollama,
                message: err.to_string(),
            })?;
    tags.models.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(tags.models)
}

/// Human-readable size using 1024 steps, rounded to a whole unit.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut unit = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }

    format!("{} {}", scaled.round() as u64, SIZE_UNITS[unit])
}
