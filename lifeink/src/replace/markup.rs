use std::sync::LazyLock;

use regex::Regex;

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Converts model markup into text suitable for an input's value.
///
/// Only the wrappers the prompts ask for are understood: `<div>` is dropped,
/// `</div>` and both `<br>` spellings become newlines.
pub fn strip_markup(markup: &str) -> String {
    markup
        .replace("<div>", "")
        .replace("</div>", "\n")
        .replace("<br />", "\n")
        .replace("<br>", "\n")
        .trim()
        .to_string()
}

/// A top-level node of a markup string, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentNode {
    Element(String),
    Text(String),
}

impl FragmentNode {
    pub fn html(&self) -> &str {
        match self {
            Self::Element(html) | Self::Text(html) => html,
        }
    }
}

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<(/?)([A-Za-z][A-Za-z0-9-]*)\b[^>]*?(/?)>")
        .expect("valid markup tag regex")
});

/// Splits markup into its top-level nodes the way a parser would hand them
/// back from a detached container's children.
pub fn split_top_level(markup: &str) -> Vec<FragmentNode> {
    let mut nodes = Vec::new();
    let mut depth = 0_usize;
    let mut open: Option<usize> = None;
    let mut cursor = 0_usize;

    for captures in TAG_PATTERN.captures_iter(markup) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let Some(name) = captures.get(2) else {
            // Comments only matter when nested.
            if depth == 0 {
                push_text(&mut nodes, &markup[cursor..whole.start()]);
                cursor = whole.end();
            }
            continue;
        };

        let tag = name.as_str().to_ascii_lowercase();
        let closing = captures.get(1).is_some_and(|m| !m.as_str().is_empty());
        let self_closing = captures.get(3).is_some_and(|m| !m.as_str().is_empty())
            || VOID_ELEMENTS.contains(&tag.as_str());

        if closing {
            if depth == 0 {
                // Stray closing tag: parsers drop it.
                push_text(&mut nodes, &markup[cursor..whole.start()]);
                cursor = whole.end();
                continue;
            }
            depth -= 1;
            if depth == 0
                && let Some(start) = open.take()
            {
                nodes.push(FragmentNode::Element(markup[start..whole.end()].to_string()));
                cursor = whole.end();
            }
            continue;
        }

        if depth == 0 {
            push_text(&mut nodes, &markup[cursor..whole.start()]);
            if self_closing {
                nodes.push(FragmentNode::Element(whole.as_str().to_string()));
                cursor = whole.end();
            } else {
                open = Some(whole.start());
                depth = 1;
            }
        } else if !self_closing {
            depth += 1;
        }
    }

    match open {
        // Unterminated element swallows the rest of the input.
        Some(start) => nodes.push(FragmentNode::Element(markup[start..].to_string())),
        None => push_text(&mut nodes, &markup[cursor..]),
    }

    nodes
}

fn push_text(nodes: &mut Vec<FragmentNode>, text: &str) {
    if !text.is_empty() {
        nodes.push(FragmentNode::Text(text.to_string()));
    }
}
