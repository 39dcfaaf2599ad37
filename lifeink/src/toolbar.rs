use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Throttle, TokioClock};
use crate::prompts::Prompt;
use crate::relay::{BackgroundChannel, Outcome, RelayError, RelayRequest, RelayResponse};
use crate::replace::DomAccessError;
use crate::settings::Settings;

/// Hostname fragments on which the toolbar is offered.
pub const TOOLBAR_HOSTS: [&str; 4] = ["office.com", "office365.com", "live.com", "outlook.com"];
pub const SELECTION_THROTTLE: Duration = Duration::from_millis(500);
pub const REINIT_DELAY: Duration = Duration::from_millis(500);
pub const INIT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const NOTICE_DURATION: Duration = Duration::from_secs(3);
/// Gap between the selection's top edge and the toolbar's bottom edge.
pub const TOOLBAR_OFFSET: f64 = 10.0;

pub const RELOADED_NOTICE: &str = "Please try again. Extension was reloaded.";
pub const REPLACE_FAILED_NOTICE: &str = "Text replacement failed. Please try again.";

pub fn toolbar_enabled(hostname: &str, settings: &Settings) -> bool {
    settings.floating_toolbar && TOOLBAR_HOSTS.iter().any(|host| hostname.contains(host))
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub inner_width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ToolbarSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub left: f64,
    pub top: f64,
}

/// Places the toolbar above the selection, clamped to the page's left edge,
/// the viewport's right edge and the page top.
pub fn toolbar_position(selection: Rect, viewport: Viewport, size: ToolbarSize) -> Position {
    let left = (selection.left + viewport.scroll_x)
        .max(0.0)
        .min(viewport.inner_width - size.width);
    let top = (selection.top + viewport.scroll_y - size.height - TOOLBAR_OFFSET).max(0.0);
    Position { left, top }
}

/// Opaque handle to a live range owned by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeHandle(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSnapshot {
    pub text: String,
    pub rect: Rect,
    pub range: RangeHandle,
    /// The focused element at selection time is contentEditable.
    pub editable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub duration: Duration,
}

impl Notice {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            duration: NOTICE_DURATION,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolbarError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Dom(#[from] DomAccessError),
}

/// The overlay's page surface.
pub trait ToolbarHost: Send + Sync {
    /// Creates the overlay with one menu item per prompt.
    fn mount(&self, prompts: &[Prompt]) -> Result<(), DomAccessError>;

    fn selection(&self) -> Option<SelectionSnapshot>;

    fn viewport(&self) -> Viewport;

    fn toolbar_size(&self) -> ToolbarSize;

    fn show_at(&self, position: Position);

    fn hide(&self);

    fn set_menu_open(&self, open: bool);

    /// Replaces the range's contents with a text node and collapses the range after it.
    fn insert_text_node(&self, range: RangeHandle, text: &str) -> Result<(), DomAccessError>;

    /// Fires `input` and then `change` on the captured editable element.
    fn dispatch_edit_events(&self) -> Result<(), DomAccessError>;

    fn show_notice(&self, notice: Notice);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptClickResult {
    Replaced,
    NoSelection,
    NotReplaced,
    Failed,
    ContextReloaded,
}

#[derive(Debug)]
struct ToolbarState {
    initialized: bool,
    extension_context_valid: bool,
    visible: bool,
    menu_open: bool,
    active_editable: bool,
    prompts: Vec<Prompt>,
}

pub struct FloatingToolbar {
    host: Arc<dyn ToolbarHost>,
    background: Arc<dyn BackgroundChannel>,
    clock: Arc<dyn Clock>,
    selection_throttle: Throttle,
    init_guard: tokio::sync::Mutex<()>,
    state: Mutex<ToolbarState>,
}

impl FloatingToolbar {
    pub fn new(host: Arc<dyn ToolbarHost>, background: Arc<dyn BackgroundChannel>) -> Self {
        Self::with_clock(host, background, Arc::new(TokioClock))
    }

    pub fn with_clock(
        host: Arc<dyn ToolbarHost>,
        background: Arc<dyn BackgroundChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            host,
            background,
            clock,
            selection_throttle: Throttle::new(SELECTION_THROTTLE),
            init_guard: tokio::sync::Mutex::new(()),
            state: Mutex::new(ToolbarState {
                initialized: false,
                extension_context_valid: true,
                visible: false,
                menu_open: false,
                active_editable: false,
                prompts: Vec::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ToolbarState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    pub fn is_visible(&self) -> bool {
        self.lock_state().visible
    }

    pub fn is_menu_open(&self) -> bool {
        self.lock_state().menu_open
    }

    pub fn is_context_valid(&self) -> bool {
        self.lock_state().extension_context_valid
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.lock_state().prompts.clone()
    }

    /// Fetches prompts and mounts the overlay once; later calls are no-ops.
    pub async fn initialize(&self) -> Result<(), ToolbarError> {
        let _guard = self.init_guard.lock().await;
        if self.is_initialized() {
            debug!("floating toolbar already initialized");
            return Ok(());
        }

        let prompts = match self.background.send(RelayRequest::GetPrompts).await? {
            RelayResponse::Prompts { prompts } => prompts,
            _ => return Err(RelayError::UnexpectedReply("getPrompts").into()),
        };
        self.host.mount(&prompts)?;

        let mut state = self.lock_state();
        info!(prompts = prompts.len(), "floating toolbar initialized");
        state.prompts = prompts;
        state.initialized = true;
        Ok(())
    }

    /// Keeps trying [`Self::initialize`] with a fixed delay between attempts.
    pub async fn initialize_with_retry(&self, max_attempts: u32) -> Result<(), ToolbarError> {
        let mut attempt = 1;
        loop {
            match self.initialize().await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < max_attempts => {
                    warn!(attempt, "floating toolbar initialization failed: {err}");
                    attempt += 1;
                    self.clock.sleep(INIT_RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `mouseup`/`keyup` handler. Returns `false` when the event was dropped.
    pub fn handle_selection_event(&self) -> bool {
        if !self.is_initialized() || !self.selection_throttle.try_acquire(self.clock.now()) {
            return false;
        }

        match self.host.selection() {
            Some(snapshot) if !snapshot.text.trim().is_empty() => {
                let position =
                    toolbar_position(snapshot.rect, self.host.viewport(), self.host.toolbar_size());
                self.host.show_at(position);
                let mut state = self.lock_state();
                state.visible = true;
                state.active_editable = snapshot.editable;
            }
            _ => {
                self.host.hide();
                self.lock_state().visible = false;
            }
        }
        true
    }

    pub fn toggle_menu(&self) {
        let open = {
            let mut state = self.lock_state();
            state.menu_open = !state.menu_open;
            state.menu_open
        };
        self.host.set_menu_open(open);
    }

    pub fn handle_document_click(&self, inside_toolbar: bool) {
        if !inside_toolbar {
            self.close_menu();
        }
    }

    fn close_menu(&self) {
        self.lock_state().menu_open = false;
        self.host.set_menu_open(false);
    }

    pub async fn handle_prompt_click(&self, prompt_id: &str) -> PromptClickResult {
        let result = self.enhance_selection(prompt_id).await;
        self.close_menu();
        result
    }

    async fn enhance_selection(&self, prompt_id: &str) -> PromptClickResult {
        // A click gets at most one reinitialization pass.
        let reinitialized = !self.is_context_valid();
        if reinitialized {
            self.reinitialize().await;
        }

        // Focus moves once the request is in flight, so the range is taken now.
        let Some(snapshot) = self.host.selection() else {
            warn!("prompt clicked without a selection");
            return PromptClickResult::NoSelection;
        };
        let editable = self.lock_state().active_editable;

        let reply = if self.background.context_valid() {
            self.background
                .send(RelayRequest::EnhanceText {
                    prompt_id: prompt_id.to_string(),
                    selected_text: snapshot.text.clone(),
                    show_diff: false,
                })
                .await
        } else {
            Err(RelayError::ContextInvalidated)
        };

        match reply {
            Ok(RelayResponse::Outcome(Outcome {
                success: true,
                enhanced_text: Some(text),
                ..
            })) => {
                if self.replace_text(&snapshot, &text, editable) {
                    PromptClickResult::Replaced
                } else {
                    PromptClickResult::NotReplaced
                }
            }
            Ok(RelayResponse::Outcome(outcome)) => {
                error!(prompt_id, error = ?outcome.error, "enhancement failed");
                PromptClickResult::Failed
            }
            Ok(_) => {
                error!(prompt_id, "unexpected reply to enhanceText");
                PromptClickResult::Failed
            }
            Err(RelayError::ContextInvalidated) => {
                self.lock_state().extension_context_valid = false;
                if !reinitialized {
                    self.reinitialize().await;
                }
                self.host.show_notice(Notice::transient(RELOADED_NOTICE));
                PromptClickResult::ContextReloaded
            }
            Err(err) => {
                error!(prompt_id, "error sending enhance request: {err}");
                PromptClickResult::Failed
            }
        }
    }

    /// One reinitialization pass: wait, then re-initialize if the context came back.
    pub async fn reinitialize(&self) -> bool {
        info!("attempting to reinitialize extension context");
        self.clock.sleep(REINIT_DELAY).await;
        if !self.background.context_valid() {
            return false;
        }

        self.lock_state().extension_context_valid = true;
        match self.initialize().await {
            Ok(()) => true,
            Err(err) => {
                error!("reinitialization failed: {err}");
                false
            }
        }
    }

    fn replace_text(&self, snapshot: &SelectionSnapshot, text: &str, editable: bool) -> bool {
        if !editable {
            info!("captured element is not contentEditable; leaving page unchanged");
            return false;
        }

        let result = self
            .host
            .insert_text_node(snapshot.range, text)
            .and_then(|()| self.host.dispatch_edit_events());
        match result {
            Ok(()) => true,
            Err(err) => {
                error!("text replacement error: {err}");
                self.host.show_notice(Notice::transient(REPLACE_FAILED_NOTICE));
                false
            }
        }
    }
}
