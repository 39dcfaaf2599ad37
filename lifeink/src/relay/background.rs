use std::sync::Arc;

use tracing::{error, info, warn};

use crate::backend::{self, ollama};
use crate::context_menu::{self, MenuError, MenuHost};
use crate::dispatcher::Dispatcher;
use crate::prompts::{PromptRegistry, builtin_prompts};
use crate::rate_limiter::RateLimiter;
use crate::relay::{Outcome, PageChannel, RelayError, RelayRequest, RelayResponse};
use crate::settings::{Settings, SettingsSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update { previous_version: String },
    Other,
}

/// The process that owns configuration and performs network calls.
#[derive(Clone)]
pub struct BackgroundService {
    dispatcher: Dispatcher,
}

impl BackgroundService {
    pub fn new(settings: Arc<dyn SettingsSource>, client: reqwest::Client) -> Self {
        Self::with_dispatcher(Dispatcher::new(settings, Arc::new(RateLimiter::new()), client))
    }

    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Answers one relay message. Failures are always folded into the reply payload.
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        match request {
            RelayRequest::Ping => RelayResponse::alive(),
            RelayRequest::GetPrompts => RelayResponse::Prompts {
                prompts: self.merged_prompts().await,
            },
            RelayRequest::EnhanceText {
                prompt_id,
                selected_text,
                ..
            } => match self.dispatcher.enhance(&prompt_id, &selected_text).await {
                Ok(enhanced) => RelayResponse::Outcome(Outcome::enhanced(enhanced)),
                Err(err) => {
                    error!(prompt_id = %prompt_id, "error enhancing text: {err}");
                    RelayResponse::Outcome(Outcome::failed(err.to_string()))
                }
            },
            RelayRequest::ListModels { endpoint } => {
                let endpoint = match endpoint.filter(|value| !value.trim().is_empty()) {
                    Some(requested) => requested,
                    None => self
                        .load_settings()
                        .await
                        .and_then(|settings| settings.custom_endpoint().map(str::to_string))
                        .unwrap_or_else(|| ollama::DEFAULT_ENDPOINT.to_string()),
                };

                match backend::list_models(self.dispatcher.client(), &endpoint).await {
                    Ok(models) => RelayResponse::Outcome(Outcome::models(models)),
                    Err(err) => {
                        warn!(endpoint = %endpoint, "error loading models: {err}");
                        RelayResponse::Outcome(Outcome::failed(format!(
                            "Error loading models: {err}. Make sure Ollama is running."
                        )))
                    }
                }
            }
        }
    }

    pub async fn merged_prompts(&self) -> Vec<crate::prompts::Prompt> {
        match self.load_settings().await {
            Some(settings) => PromptRegistry::new(&settings.custom_prompts).list_prompts(),
            None => builtin_prompts().to_vec(),
        }
    }

    /// Context-menu click: verify the tab's agent is reachable, then ask it to run the prompt.
    ///
    /// Returns `Ok(false)` when the menu id is not a known prompt.
    pub async fn on_menu_clicked(
        &self,
        menu_item_id: &str,
        selection_text: &str,
        tab: &dyn PageChannel,
    ) -> Result<bool, RelayError> {
        let settings = self.load_settings().await.unwrap_or_default();
        if !PromptRegistry::new(&settings.custom_prompts).contains(menu_item_id) {
            return Ok(false);
        }

        ensure_page_agent(tab).await?;

        let request = RelayRequest::EnhanceText {
            prompt_id: menu_item_id.to_string(),
            selected_text: selection_text.to_string(),
            show_diff: settings.show_diff,
        };
        if let Err(err) = tab.send(request).await {
            error!("error sending enhance request to page agent: {err}");
            return Err(err);
        }

        Ok(true)
    }

    pub async fn on_installed(
        &self,
        reason: InstallReason,
        current_version: &str,
        menu: &dyn MenuHost,
    ) -> Result<usize, MenuError> {
        if let InstallReason::Update { previous_version } = &reason {
            info!("extension updated from version {previous_version} to {current_version}");
        }

        let settings = self.load_settings().await.unwrap_or_default();
        context_menu::rebuild(menu, &settings.custom_prompts).await
    }

    async fn load_settings(&self) -> Option<Settings> {
        match self.dispatcher.load_settings().await {
            Ok(settings) => Some(settings),
            Err(err) => {
                warn!("failed to load settings: {err}");
                None
            }
        }
    }
}

/// Pings the tab's agent and injects it once when the ping fails.
pub async fn ensure_page_agent(tab: &dyn PageChannel) -> Result<(), RelayError> {
    match tab.send(RelayRequest::Ping).await {
        Ok(RelayResponse::Status { .. }) => Ok(()),
        Ok(other) => {
            warn!(?other, "unexpected ping reply; injecting page agent");
            inject_once(tab).await
        }
        Err(err) => {
            info!("page agent not reachable ({err}); injecting");
            inject_once(tab).await
        }
    }
}

async fn inject_once(tab: &dyn PageChannel) -> Result<(), RelayError> {
    tab.inject_agent().await.map_err(|err| {
        error!("failed to inject page agent: {err}");
        match err {
            RelayError::InjectionFailed(_) => err,
            other => RelayError::InjectionFailed(other.to_string()),
        }
    })
}
