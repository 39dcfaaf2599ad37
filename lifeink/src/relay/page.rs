use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::clock::{Clock, Throttle, TokioClock};
use crate::relay::{BackgroundChannel, Outcome, RelayError, RelayRequest, RelayResponse};
use crate::replace::{self, DomHost};

pub const MESSAGE_THROTTLE: Duration = Duration::from_millis(500);

/// Page-embedded agent answering the background's `ping` and `enhanceText`.
pub struct PageAgent {
    background: Arc<dyn BackgroundChannel>,
    dom: Arc<dyn DomHost>,
    clock: Arc<dyn Clock>,
    enhance_throttle: Throttle,
    registered: AtomicBool,
}

impl PageAgent {
    pub fn new(background: Arc<dyn BackgroundChannel>, dom: Arc<dyn DomHost>) -> Self {
        Self::with_clock(background, dom, Arc::new(TokioClock))
    }

    pub fn with_clock(
        background: Arc<dyn BackgroundChannel>,
        dom: Arc<dyn DomHost>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            background,
            dom,
            clock,
            enhance_throttle: Throttle::new(MESSAGE_THROTTLE),
            registered: AtomicBool::new(false),
        }
    }

    /// Claims the page's message listener slot. Only the first call returns
    /// `true`; re-injected agents must not attach a second listener.
    pub fn register(&self) -> bool {
        let first = !self.registered.swap(true, Ordering::SeqCst);
        if !first {
            debug!("page agent listener already registered");
        }
        first
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// `None` means the message is not addressed to this agent (or was
    /// throttled) and the channel should be left without a reply.
    pub async fn handle_message(&self, request: RelayRequest) -> Option<RelayResponse> {
        match request {
            RelayRequest::Ping => Some(RelayResponse::alive()),
            RelayRequest::EnhanceText {
                prompt_id,
                selected_text,
                ..
            } => {
                if !self.enhance_throttle.try_acquire(self.clock.now()) {
                    info!(prompt_id = %prompt_id, "enhance request dropped by throttle");
                    return None;
                }
                Some(RelayResponse::Outcome(
                    self.enhance_and_replace(prompt_id, selected_text).await,
                ))
            }
            RelayRequest::GetPrompts | RelayRequest::ListModels { .. } => None,
        }
    }

    async fn enhance_and_replace(&self, prompt_id: String, selected_text: String) -> Outcome {
        let request = RelayRequest::EnhanceText {
            prompt_id,
            selected_text,
            show_diff: false,
        };

        match self.background.send(request).await {
            Ok(RelayResponse::Outcome(Outcome {
                success: true,
                enhanced_text: Some(text),
                ..
            })) => {
                replace::replace_selected_text(self.dom.as_ref(), &text);
                Outcome::ok()
            }
            Ok(RelayResponse::Outcome(outcome)) => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "Enhancement returned no text".to_string());
                error!("enhancement failed: {message}");
                Outcome::failed(message)
            }
            Ok(_) => Outcome::failed(RelayError::UnexpectedReply("enhanceText").to_string()),
            Err(err) => {
                error!("error forwarding enhance request: {err}");
                Outcome::failed(err.to_string())
            }
        }
    }
}
