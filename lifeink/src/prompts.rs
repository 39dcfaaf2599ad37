use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub prompt: String,
}

impl Prompt {
    pub fn new(id: impl Into<String>, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            prompt: prompt.into(),
        }
    }

    /// Builds a user prompt whose id is derived from its title.
    pub fn custom(title: &str, prompt: impl Into<String>) -> Self {
        Self::new(prompt_id_from_title(title), title, prompt)
    }
}

const FIX_GRAMMAR_PROMPT: &str = "You are a professional editor. Your task is to fix spelling and grammar errors while exactly preserving HTML formatting. CRUCIAL: Each paragraph must be wrapped in <div> tags and line breaks must use <br /> tags. Example input: \"<div>Hello team,</div><div>Hope your doing well.</div>\" should output: \"<div>Hello team,</div><div>Hope you're doing well.</div>\". Keep all HTML tags in their original positions. Only output the corrected text using the following text as input:";

const IMPROVE_WRITING_PROMPT: &str = "You are a professional writer. Your task is to improve writing quality and make it more professional but also polite. Seperate each paragraph when necessary with <div> tags and line breaks must use <br /> tags. Using the following text as input and only output the improved text without your comments:";

const SUMMARIZE_PROMPT: &str = "You are a summarization expert. Your task is to summarize the content in the input text below the colonwhile exactly preserving HTML formatting. You will summarize the content in a bullet point format. Each paragraph needs <div> tags and line breaks need <br /> tags. Only output the formatted result using the following text as input:";

const ANALYZE_PROMPT: &str = "You are the best cusotmer service agent in the technical support centre. Your task is to write a response to address all the issues and concerns from the following text from a customer:";

/// Built-in prompts in their fixed display order.
pub fn builtin_prompts() -> &'static [Prompt] {
    static BUILTINS: std::sync::OnceLock<Vec<Prompt>> = std::sync::OnceLock::new();
    BUILTINS
        .get_or_init(|| {
            vec![
                Prompt::new("fix_grammar", "Fix spelling and grammar", FIX_GRAMMAR_PROMPT),
                Prompt::new("improve_writing", "Improve writing quality", IMPROVE_WRITING_PROMPT),
                Prompt::new("summarize", "Summarize content", SUMMARIZE_PROMPT),
                Prompt::new("analyze", "Analyse and respond", ANALYZE_PROMPT),
            ]
        })
        .as_slice()
}

/// Read-only view over built-in prompts followed by the user's prompts.
///
/// Lookups scan in order and take the first match, so a user prompt reusing a
/// built-in id never overrides the built-in.
#[derive(Debug, Clone, Copy)]
pub struct PromptRegistry<'a> {
    custom: &'a [Prompt],
}

impl<'a> PromptRegistry<'a> {
    pub fn new(custom: &'a [Prompt]) -> Self {
        Self { custom }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Prompt> + 'a {
        builtin_prompts().iter().chain(self.custom.iter())
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.iter().cloned().collect()
    }

    pub fn resolve(&self, id: &str) -> Option<&'a Prompt> {
        self.iter().find(|prompt| prompt.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }
}

/// Lowercases `title` and replaces every whitespace run with `_`.
pub fn prompt_id_from_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_prompt() -> Prompt {
        Prompt::custom("Make Friendly", "Rewrite in a friendly tone:")
    }

    #[test]
    fn builtins_come_first_in_fixed_order() {
        let custom = vec![tone_prompt()];
        let ids: Vec<String> = PromptRegistry::new(&custom)
            .list_prompts()
            .into_iter()
            .map(|prompt| prompt.id)
            .collect();

        assert_eq!(
            ids,
            vec!["fix_grammar", "improve_writing", "summarize", "analyze", "make_friendly"]
        );
    }

    #[test]
    fn resolve_finds_custom_prompt() {
        let custom = vec![tone_prompt()];
        let registry = PromptRegistry::new(&custom);
        let resolved = registry.resolve("make_friendly").expect("custom prompt should resolve");
        assert_eq!(resolved.prompt, "Rewrite in a friendly tone:");
    }

    #[test]
    fn builtin_wins_over_custom_with_same_id() {
        let custom = vec![Prompt::new("summarize", "Mine", "my own summary prompt")];
        let registry = PromptRegistry::new(&custom);
        let resolved = registry.resolve("summarize").expect("summarize should resolve");
        assert_eq!(resolved.title, "Summarize content");
        assert_eq!(registry.list_prompts().len(), 5);
    }

    #[test]
    fn resolve_is_stable_across_calls() {
        let custom = vec![tone_prompt()];
        let registry = PromptRegistry::new(&custom);
        assert_eq!(registry.resolve("fix_grammar"), registry.resolve("fix_grammar"));
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn prompt_id_collapses_whitespace() {
        assert_eq!(prompt_id_from_title("Polite  Reply\tNow"), "polite_reply_now");
        assert_eq!(prompt_id_from_title("Shorten"), "shorten");
    }
}
