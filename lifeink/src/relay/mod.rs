pub mod background;
pub mod codec;
pub mod page;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ModelInfo;
use crate::prompts::Prompt;

pub use background::BackgroundService;
pub use page::PageAgent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("message channel unreachable: {0}")]
    Unreachable(String),
    #[error("Extension context invalidated")]
    ContextInvalidated,
    #[error("failed to inject page agent: {0}")]
    InjectionFailed(String),
    #[error("unexpected reply to `{0}`")]
    UnexpectedReply(&'static str),
}

/// Messages exchanged between the page agent and the background process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RelayRequest {
    Ping,
    GetPrompts,
    #[serde(rename_all = "camelCase")]
    EnhanceText {
        prompt_id: String,
        #[serde(default)]
        selected_text: String,
        #[serde(default)]
        show_diff: bool,
    },
    ListModels {
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl RelayRequest {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetPrompts => "getPrompts",
            Self::EnhanceText { .. } => "enhanceText",
            Self::ListModels { .. } => "listModels",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Alive,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<ModelInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn enhanced(text: String) -> Self {
        Self {
            success: true,
            enhanced_text: Some(text),
            ..Self::default()
        }
    }

    pub fn models(models: Vec<ModelInfo>) -> Self {
        Self {
            success: true,
            models: Some(models),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Status { status: AgentStatus },
    Prompts { prompts: Vec<Prompt> },
    Outcome(Outcome),
}

impl RelayResponse {
    pub fn alive() -> Self {
        Self::Status {
            status: AgentStatus::Alive,
        }
    }
}

/// Page-to-background direction (`runtime.sendMessage`).
#[async_trait]
pub trait BackgroundChannel: Send + Sync {
    /// Whether the extension context backing this channel is still valid.
    fn context_valid(&self) -> bool {
        true
    }

    async fn send(&self, request: RelayRequest) -> Result<RelayResponse, RelayError>;
}

/// Background-to-tab direction (`tabs.sendMessage` plus on-demand script injection).
#[async_trait]
pub trait PageChannel: Send + Sync {
    async fn send(&self, request: RelayRequest) -> Result<RelayResponse, RelayError>;

    async fn inject_agent(&self) -> Result<(), RelayError>;
}
