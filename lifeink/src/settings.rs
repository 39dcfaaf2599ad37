use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::prompts::Prompt;
use crate::secure_storage::{ApiKeyVault, KeyringError};

pub const DEFAULT_PROVIDER: &str = "ollama";
pub const DEFAULT_MODEL: &str = "llama3.1:latest";
pub const DEFAULT_CUSTOM_ENDPOINT: &str = "http://localhost:11434/api/generate";
const CONFIG_DIR_NAME: &str = "lifeink";
const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_PATH_ENV: &str = "LIFEINK_CONFIG";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LLM provider not set. Please set it in the extension options.")]
    MissingProvider,
    #[error("{0} API key not set. Please set it in the extension options.")]
    MissingCredential(Provider),
    #[error("LLM model not set for {0}. Please set it in the extension options.")]
    MissingModel(Provider),
    #[error("invalid custom endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("invalid settings: {0}")]
    Invalid(String),
    #[error("failed to access settings file: {0}")]
    Io(String),
    #[error("failed to parse settings file: {0}")]
    Parse(String),
    #[error(transparent)]
    SecureStorage(#[from] KeyringError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Ollama,
}

impl Provider {
    pub fn id(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic",
            Self::Ollama => "Ollama",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown LLM provider `{0}`")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

/// Persisted extension settings. Every key is optional on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_provider")]
    pub llm_provider: String,
    #[serde(default = "default_model")]
    pub llm_model: String,
    #[serde(default = "default_custom_endpoint")]
    pub custom_endpoint: String,
    #[serde(default)]
    pub show_diff: bool,
    #[serde(default)]
    pub custom_prompts: Vec<Prompt>,
    #[serde(default = "default_floating_toolbar")]
    pub floating_toolbar: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            llm_provider: default_provider(),
            llm_model: default_model(),
            custom_endpoint: default_custom_endpoint(),
            show_diff: false,
            custom_prompts: Vec::new(),
            floating_toolbar: default_floating_toolbar(),
        }
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_custom_endpoint() -> String {
    DEFAULT_CUSTOM_ENDPOINT.to_string()
}

fn default_floating_toolbar() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSelection {
    Selected(Provider),
    Unset,
    Unknown(String),
}

impl Settings {
    pub fn provider(&self) -> ProviderSelection {
        let raw = self.llm_provider.trim();
        if raw.is_empty() {
            return ProviderSelection::Unset;
        }

        match raw.parse::<Provider>() {
            Ok(provider) => ProviderSelection::Selected(provider),
            Err(UnknownProvider(value)) => ProviderSelection::Unknown(value),
        }
    }

    pub fn custom_endpoint(&self) -> Option<&str> {
        let trimmed = self.custom_endpoint.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// True when the custom prompt list differs, which is what the context menu depends on.
    pub fn prompts_changed(&self, other: &Settings) -> bool {
        self.custom_prompts != other.custom_prompts
    }
}

/// Read access to the current settings, re-read on every dispatch.
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
}

#[derive(Debug, Clone)]
pub struct StaticSettings(pub Settings);

impl SettingsSource for StaticSettings {
    fn load(&self) -> Result<Settings, ConfigError> {
        Ok(self.0.clone())
    }
}

/// JSON-file settings store with optional keyring-backed API key.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    vault: Option<ApiKeyVault>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            vault: None,
        }
    }

    pub fn with_secure_storage(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self::with_vault(path, ApiKeyVault::open()?))
    }

    pub fn with_vault(path: impl Into<PathBuf>, vault: ApiKeyVault) -> Self {
        Self {
            path: path.into(),
            vault: Some(vault),
        }
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(value) = std::env::var(CONFIG_PATH_ENV) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| ConfigError::Io("no user config directory available".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, settings: Settings) -> Result<Settings, ConfigError> {
        let validated = validate_settings(settings)?;

        let mut persisted = validated.clone();
        if let Some(vault) = &self.vault
            && store_api_key_securely(vault, &validated.api_key)
        {
            persisted.api_key.clear();
        }
        self.write_config(&persisted)?;

        Ok(validated)
    }

    fn read_config(&self) -> Result<Settings, ConfigError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_json::from_str::<Settings>(&content)
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn write_config(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConfigError::Io(err.to_string()))?;
        }

        let serialized = serde_json::to_string_pretty(settings)
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        fs::write(&self.path, serialized).map_err(|err| ConfigError::Io(err.to_string()))
    }

    fn merge_secure_api_key(&self, vault: &ApiKeyVault, settings: &mut Settings) {
        match vault.read_api_key() {
            Ok(Some(api_key)) => {
                settings.api_key = api_key;
            }
            Ok(None) => {
                if !settings.api_key.is_empty() {
                    // Legacy plaintext key: move it into the keyring and scrub the file.
                    if let Err(err) = vault.write_api_key(&settings.api_key) {
                        warn!("failed to migrate API key into secure storage: {err}");
                    } else {
                        let mut sanitized = settings.clone();
                        sanitized.api_key.clear();
                        if let Err(err) = self.write_config(&sanitized) {
                            warn!("failed to rewrite config after key migration: {err}");
                        }
                    }
                }
            }
            Err(err) => {
                warn!("failed to read API key from secure storage; using config fallback: {err}");
            }
        }
    }
}

impl SettingsSource for SettingsStore {
    fn load(&self) -> Result<Settings, ConfigError> {
        let mut settings = normalize_loaded_settings(self.read_config()?);

        if let Some(vault) = &self.vault {
            self.merge_secure_api_key(vault, &mut settings);
        }

        if settings.api_key.trim().is_empty() {
            if let Some(env_api_key) = read_api_key_from_environment() {
                settings.api_key = env_api_key;
            }
        }

        Ok(settings)
    }
}

/// `true` when the key now lives in the keyring and can be dropped from the file.
fn store_api_key_securely(vault: &ApiKeyVault, api_key: &str) -> bool {
    if let Err(err) = vault.write_api_key(api_key) {
        warn!("{err}; falling back to config persistence");
        return false;
    }

    if api_key.trim().is_empty() {
        return true;
    }

    match vault.read_api_key() {
        Ok(Some(saved_key)) if saved_key.trim() == api_key.trim() => true,
        Ok(_) => {
            warn!("secure storage write could not be verified, falling back to config persistence");
            false
        }
        Err(err) => {
            warn!("{err}; falling back to config persistence");
            false
        }
    }
}

fn read_api_key_from_environment() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_loaded_settings(mut settings: Settings) -> Settings {
    settings.api_key = settings.api_key.trim().to_string();
    settings.llm_provider = settings.llm_provider.trim().to_lowercase();
    settings.llm_model = settings.llm_model.trim().to_string();
    settings.custom_endpoint = settings.custom_endpoint.trim().to_string();
    settings
}

fn validate_settings(settings: Settings) -> Result<Settings, ConfigError> {
    let settings = normalize_loaded_settings(settings);

    if let ProviderSelection::Unknown(value) = settings.provider() {
        return Err(ConfigError::Invalid(format!(
            "llmProvider must be one of: anthropic, ollama (got `{value}`)"
        )));
    }

    if let Some(endpoint) = settings.custom_endpoint() {
        url::Url::parse(endpoint).map_err(|_| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
    }

    for prompt in &settings.custom_prompts {
        if prompt.title.trim().is_empty() {
            return Err(ConfigError::Invalid("custom prompt title cannot be empty".to_string()));
        }
        if prompt.id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "custom prompt `{}` has an empty id",
                prompt.title
            )));
        }
    }

    Ok(settings)
}
