//! Page-side text replacement.
//!
//! The page is described by an [`ActiveContext`] snapshot taken at replacement
//! time. [`classify`] and [`plan`] turn that snapshot into a
//! [`ReplacementPlan`] without touching the page; [`execute`] then drives a
//! [`DomHost`] through the chosen steps.

pub mod markup;

use thiserror::Error;
use tracing::{debug, error, info};

pub use markup::{FragmentNode, split_top_level, strip_markup};

/// Class of the outer iframe hosting the full-page content editor.
pub const NESTED_EDITOR_OUTER_FRAME: &str = "fullPageContentEditorFrame";
/// Class of the rich-text editor iframe inside the outer frame.
pub const NESTED_EDITOR_INNER_FRAME: &str = "cke_wysiwyg_frame";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomAccessError {
    #[error("frame document is not accessible: {0}")]
    FrameInaccessible(String),
    #[error("selection range is unavailable")]
    NoRange,
    #[error("DOM operation `{operation}` failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Input,
    TextArea,
    ContentEditable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveElement {
    pub kind: ElementKind,
    /// Current value for inputs and textareas; empty otherwise.
    pub value: String,
    /// Selection offsets in UTF-16 code units, as reported by the element.
    pub selection: Option<(usize, usize)>,
}

impl ActiveElement {
    pub fn text_control(
        kind: ElementKind,
        value: impl Into<String>,
        selection: (usize, usize),
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            selection: Some(selection),
        }
    }

    pub fn content_editable() -> Self {
        Self {
            kind: ElementKind::ContentEditable,
            value: String::new(),
            selection: None,
        }
    }
}

/// What was found below the outer editor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedEditorContext {
    /// The inner editor frame (or its document) is missing.
    EditorMissing,
    Ready { has_selection: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCapabilities {
    pub native_text_insertion: bool,
    pub native_html_insertion: bool,
}

impl HostCapabilities {
    pub fn native() -> Self {
        Self {
            native_text_insertion: true,
            native_html_insertion: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActiveContext {
    /// Present when the page contains the outer editor frame.
    pub nested_editor: Option<NestedEditorContext>,
    pub active_element: Option<ActiveElement>,
    /// The top-level window selection has at least one range.
    pub has_range: bool,
    pub capabilities: HostCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NestedRichEditor,
    PlainInput,
    RichEditable,
    Unsupported,
}

/// Synthetic notification fired after a manual value splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputNotification {
    pub input_type: &'static str,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacementPlan {
    Noop { reason: &'static str },
    /// Focus the element and use the host's undo-aware text insertion.
    InsertText { text: String },
    /// Overwrite the control's value and notify listeners.
    SpliceValue {
        value: String,
        notification: InputNotification,
    },
    InsertHtml { html: String },
    /// Delete the range contents and insert a `<div>` holding the markup.
    ReplaceRangeWithWrapper { html: String },
    /// Delete the nested editor's range contents, insert the nodes as one
    /// fragment, then drop blank boundary containers.
    InsertFragment { nodes: Vec<FragmentNode> },
    AppendToBody { html: String },
}

pub fn classify(context: &ActiveContext) -> Strategy {
    if context.nested_editor.is_some() {
        return Strategy::NestedRichEditor;
    }

    match context.active_element.as_ref().map(|element| element.kind) {
        Some(ElementKind::Input | ElementKind::TextArea) => Strategy::PlainInput,
        Some(ElementKind::ContentEditable) => Strategy::RichEditable,
        Some(ElementKind::Other) | None => Strategy::Unsupported,
    }
}

pub fn plan(context: &ActiveContext, new_text: &str) -> ReplacementPlan {
    match classify(context) {
        Strategy::NestedRichEditor => match context.nested_editor {
            Some(NestedEditorContext::Ready {
                has_selection: true,
            }) => ReplacementPlan::InsertFragment {
                nodes: split_top_level(new_text),
            },
            Some(NestedEditorContext::Ready {
                has_selection: false,
            }) => ReplacementPlan::AppendToBody {
                html: new_text.to_string(),
            },
            Some(NestedEditorContext::EditorMissing) | None => ReplacementPlan::Noop {
                reason: "nested editor frame not found",
            },
        },
        Strategy::PlainInput => plan_plain_input(context, new_text),
        Strategy::RichEditable => {
            if !context.has_range {
                ReplacementPlan::Noop {
                    reason: "no selection range",
                }
            } else if context.capabilities.native_html_insertion {
                ReplacementPlan::InsertHtml {
                    html: new_text.to_string(),
                }
            } else {
                ReplacementPlan::ReplaceRangeWithWrapper {
                    html: new_text.to_string(),
                }
            }
        }
        Strategy::Unsupported => ReplacementPlan::Noop {
            reason: "no suitable editable element",
        },
    }
}

fn plan_plain_input(context: &ActiveContext, new_text: &str) -> ReplacementPlan {
    let plain = strip_markup(new_text);
    if context.capabilities.native_text_insertion {
        return ReplacementPlan::InsertText { text: plain };
    }

    let Some(element) = context.active_element.as_ref() else {
        return ReplacementPlan::Noop {
            reason: "no active element",
        };
    };
    let Some((start, end)) = element.selection else {
        return ReplacementPlan::Noop {
            reason: "element has no selection offsets",
        };
    };

    ReplacementPlan::SpliceValue {
        value: splice_utf16(&element.value, start, end, &plain),
        notification: InputNotification {
            input_type: "insertText",
            data: plain,
        },
    }
}

/// Replaces `[start, end)` (UTF-16 offsets, clamped) of `value` with `insert`.
pub fn splice_utf16(value: &str, start: usize, end: usize, insert: &str) -> String {
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    let head = utf16_to_byte_index(value, start);
    let tail = utf16_to_byte_index(value, end);

    let mut spliced = String::with_capacity(value.len() + insert.len());
    spliced.push_str(&value[..head]);
    spliced.push_str(insert);
    spliced.push_str(&value[tail..]);
    spliced
}

fn utf16_to_byte_index(value: &str, offset: usize) -> usize {
    let mut units = 0;
    for (index, ch) in value.char_indices() {
        if units >= offset {
            return index;
        }
        units += ch.len_utf16();
    }
    value.len()
}

/// Page access used by the replacement engine. Each call is one DOM step.
pub trait DomHost: Send + Sync {
    fn active_context(&self) -> Result<ActiveContext, DomAccessError>;

    fn insert_text(&self, text: &str) -> Result<(), DomAccessError>;

    fn set_value(&self, value: &str) -> Result<(), DomAccessError>;

    fn dispatch_input(&self, notification: &InputNotification) -> Result<(), DomAccessError>;

    fn insert_html(&self, html: &str) -> Result<(), DomAccessError>;

    fn replace_range_with_wrapper(&self, html: &str) -> Result<(), DomAccessError>;

    fn insert_fragment(&self, nodes: &[FragmentNode]) -> Result<(), DomAccessError>;

    /// Removes the range's start/end containers when their text is blank.
    fn remove_blank_boundaries(&self) -> Result<(), DomAccessError>;

    fn append_to_body(&self, html: &str) -> Result<(), DomAccessError>;
}

/// Runs a plan. Returns whether the page was changed.
pub fn execute(host: &dyn DomHost, plan: &ReplacementPlan) -> Result<bool, DomAccessError> {
    match plan {
        ReplacementPlan::Noop { reason } => {
            info!(reason, "text replacement skipped");
            return Ok(false);
        }
        ReplacementPlan::InsertText { text } => host.insert_text(text)?,
        ReplacementPlan::SpliceValue {
            value,
            notification,
        } => {
            host.set_value(value)?;
            host.dispatch_input(notification)?;
        }
        ReplacementPlan::InsertHtml { html } => host.insert_html(html)?,
        ReplacementPlan::ReplaceRangeWithWrapper { html } => host.replace_range_with_wrapper(html)?,
        ReplacementPlan::InsertFragment { nodes } => {
            host.insert_fragment(nodes)?;
            host.remove_blank_boundaries()?;
        }
        ReplacementPlan::AppendToBody { html } => host.append_to_body(html)?,
    }

    Ok(true)
}

/// Replaces the current selection with `new_text`. DOM failures are logged
/// and reported as `false`.
pub fn replace_selected_text(host: &dyn DomHost, new_text: &str) -> bool {
    let result = host.active_context().and_then(|context| {
        let strategy = classify(&context);
        let plan = plan(&context, new_text);
        debug!(?strategy, "text replacement planned");
        execute(host, &plan)
    });

    match result {
        Ok(changed) => changed,
        Err(err) => {
            error!("error replacing selected text: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Step {
        InsertText(String),
        SetValue(String),
        Input(InputNotification),
        InsertHtml(String),
        Wrapper(String),
        Fragment(Vec<String>),
        PruneBoundaries,
        Append(String),
    }

    struct RecordingHost {
        context: Result<ActiveContext, DomAccessError>,
        fail_on_fragment: bool,
        steps: Mutex<Vec<Step>>,
    }

    impl RecordingHost {
        fn new(context: ActiveContext) -> Self {
            Self {
                context: Ok(context),
                fail_on_fragment: false,
                steps: Mutex::new(Vec::new()),
            }
        }

        fn steps(&self) -> Vec<Step> {
            self.steps.lock().expect("steps lock").clone()
        }

        fn record(&self, step: Step) -> Result<(), DomAccessError> {
            self.steps.lock().expect("steps lock").push(step);
            Ok(())
        }
    }

    impl DomHost for RecordingHost {
        fn active_context(&self) -> Result<ActiveContext, DomAccessError> {
            self.context.clone()
        }

        fn insert_text(&self, text: &str) -> Result<(), DomAccessError> {
            self.record(Step::InsertText(text.to_string()))
        }

        fn set_value(&self, value: &str) -> Result<(), DomAccessError> {
            self.record(Step::SetValue(value.to_string()))
        }

        fn dispatch_input(&self, notification: &InputNotification) -> Result<(), DomAccessError> {
            self.record(Step::Input(notification.clone()))
        }

        fn insert_html(&self, html: &str) -> Result<(), DomAccessError> {
            self.record(Step::InsertHtml(html.to_string()))
        }

        fn replace_range_with_wrapper(&self, html: &str) -> Result<(), DomAccessError> {
            self.record(Step::Wrapper(html.to_string()))
        }

        fn insert_fragment(&self, nodes: &[FragmentNode]) -> Result<(), DomAccessError> {
            if self.fail_on_fragment {
                return Err(DomAccessError::NoRange);
            }
            self.record(Step::Fragment(nodes.iter().map(|node| node.html().to_string()).collect()))
        }

        fn remove_blank_boundaries(&self) -> Result<(), DomAccessError> {
            self.record(Step::PruneBoundaries)
        }

        fn append_to_body(&self, html: &str) -> Result<(), DomAccessError> {
            self.record(Step::Append(html.to_string()))
        }
    }

    fn textarea(value: &str, selection: (usize, usize)) -> ActiveContext {
        ActiveContext {
            active_element: Some(ActiveElement::text_control(
                ElementKind::TextArea,
                value,
                selection,
            )),
            ..ActiveContext::default()
        }
    }

    #[test]
    fn classify_prefers_nested_editor() {
        let mut context = textarea("x", (0, 1));
        assert_eq!(classify(&context), Strategy::PlainInput);

        context.nested_editor = Some(NestedEditorContext::Ready { has_selection: true });
        assert_eq!(classify(&context), Strategy::NestedRichEditor);

        let editable = ActiveContext {
            active_element: Some(ActiveElement::content_editable()),
            ..ActiveContext::default()
        };
        assert_eq!(classify(&editable), Strategy::RichEditable);
        assert_eq!(classify(&ActiveContext::default()), Strategy::Unsupported);
    }

    #[test]
    fn textarea_splice_inserts_plain_text_at_offsets() {
        let host = RecordingHost::new(textarea("The  fox jumps", (3, 7)));
        assert!(replace_selected_text(&host, "<div>quick</div>"));
        assert_eq!(
            host.steps(),
            vec![
                Step::SetValue("Thequickx jumps".to_string()),
                Step::Input(InputNotification {
                    input_type: "insertText",
                    data: "quick".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn native_text_insertion_is_preferred() {
        let mut context = textarea("The  fox jumps", (3, 7));
        context.capabilities = HostCapabilities::native();
        let host = RecordingHost::new(context);

        assert!(replace_selected_text(&host, "<div>quick</div>"));
        assert_eq!(host.steps(), vec![Step::InsertText("quick".to_string())]);
    }

    #[test]
    fn splice_counts_utf16_units() {
        assert_eq!(splice_utf16("a😀b", 1, 3, "X"), "aXb");
        assert_eq!(splice_utf16("héllo", 1, 2, "e"), "hello");
        assert_eq!(splice_utf16("abc", 5, 9, "!"), "abc!");
        assert_eq!(splice_utf16("abc", 2, 1, "-"), "a-c");
    }

    #[test]
    fn rich_editable_uses_html_insertion_or_wrapper() {
        let mut context = ActiveContext {
            active_element: Some(ActiveElement::content_editable()),
            has_range: true,
            capabilities: HostCapabilities::native(),
            ..ActiveContext::default()
        };
        assert_eq!(
            plan(&context, "<div>hi</div>"),
            ReplacementPlan::InsertHtml {
                html: "<div>hi</div>".to_string()
            }
        );

        context.capabilities = HostCapabilities::default();
        assert_eq!(
            plan(&context, "<div>hi</div>"),
            ReplacementPlan::ReplaceRangeWithWrapper {
                html: "<div>hi</div>".to_string()
            }
        );

        context.has_range = false;
        assert!(matches!(plan(&context, "x"), ReplacementPlan::Noop { .. }));
    }

    #[test]
    fn nested_editor_inserts_fragment_then_prunes() {
        let host = RecordingHost::new(ActiveContext {
            nested_editor: Some(NestedEditorContext::Ready { has_selection: true }),
            ..ActiveContext::default()
        });

        assert!(replace_selected_text(&host, "<div>one</div><div>two</div>"));
        assert_eq!(
            host.steps(),
            vec![
                Step::Fragment(vec!["<div>one</div>".to_string(), "<div>two</div>".to_string()]),
                Step::PruneBoundaries,
            ]
        );
    }

    #[test]
    fn nested_editor_without_selection_appends() {
        let context = ActiveContext {
            nested_editor: Some(NestedEditorContext::Ready { has_selection: false }),
            ..ActiveContext::default()
        };
        assert_eq!(
            plan(&context, "<div>tail</div>"),
            ReplacementPlan::AppendToBody {
                html: "<div>tail</div>".to_string()
            }
        );

        let missing = ActiveContext {
            nested_editor: Some(NestedEditorContext::EditorMissing),
            ..ActiveContext::default()
        };
        assert!(matches!(plan(&missing, "x"), ReplacementPlan::Noop { .. }));
    }

    #[test]
    fn dom_failures_are_swallowed() {
        let host = RecordingHost {
            context: Err(DomAccessError::FrameInaccessible("cross-origin".to_string())),
            fail_on_fragment: false,
            steps: Mutex::new(Vec::new()),
        };
        assert!(!replace_selected_text(&host, "x"));
        assert!(host.steps().is_empty());

        let host = RecordingHost {
            fail_on_fragment: true,
            ..RecordingHost::new(ActiveContext {
                nested_editor: Some(NestedEditorContext::Ready { has_selection: true }),
                ..ActiveContext::default()
            })
        };
        assert!(!replace_selected_text(&host, "<div>x</div>"));
        assert!(host.steps().is_empty());
    }
}
