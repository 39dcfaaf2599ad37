use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::prompts::{Prompt, PromptRegistry};
use crate::settings::Settings;

pub const MENU_ROOT_ID: &str = "lifeinkMenu";
pub const MENU_ROOT_TITLE: &str = "Lifeink";
const SELECTION_CONTEXT: &str = "selection";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub contexts: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("context menu operation failed: {0}")]
pub struct MenuError(pub String);

#[async_trait]
pub trait MenuHost: Send + Sync {
    async fn remove_all(&self) -> Result<(), MenuError>;

    async fn create(&self, entry: &MenuEntry) -> Result<(), MenuError>;
}

/// Parent entry followed by one child per merged prompt.
pub fn build_menu(custom_prompts: &[Prompt]) -> Vec<MenuEntry> {
    let selection = vec![SELECTION_CONTEXT.to_string()];
    let root = MenuEntry {
        id: MENU_ROOT_ID.to_string(),
        title: MENU_ROOT_TITLE.to_string(),
        parent_id: None,
        contexts: selection.clone(),
    };

    std::iter::once(root)
        .chain(PromptRegistry::new(custom_prompts).iter().map(|prompt| MenuEntry {
            id: prompt.id.clone(),
            title: prompt.title.clone(),
            parent_id: Some(MENU_ROOT_ID.to_string()),
            contexts: selection.clone(),
        }))
        .collect()
}

/// Clears the menu and recreates it. Returns the number of entries created.
pub async fn rebuild(host: &dyn MenuHost, custom_prompts: &[Prompt]) -> Result<usize, MenuError> {
    host.remove_all().await?;

    let entries = build_menu(custom_prompts);
    for entry in &entries {
        host.create(entry).await?;
    }
    info!(entries = entries.len(), "context menu rebuilt");
    Ok(entries.len())
}

/// Storage-change hook: only a change to the custom prompt list rebuilds.
pub async fn on_settings_changed(
    host: &dyn MenuHost,
    previous: &Settings,
    current: &Settings,
) -> bool {
    if !previous.prompts_changed(current) {
        return false;
    }

    match rebuild(host, &current.custom_prompts).await {
        Ok(_) => true,
        Err(err) => {
            warn!("failed to rebuild context menu: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMenu {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MenuHost for RecordingMenu {
        async fn remove_all(&self) -> Result<(), MenuError> {
            self.log.lock().expect("log lock").push("clear".to_string());
            Ok(())
        }

        async fn create(&self, entry: &MenuEntry) -> Result<(), MenuError> {
            self.log.lock().expect("log lock").push(entry.id.clone());
            Ok(())
        }
    }

    #[test]
    fn menu_lists_root_then_prompts() {
        let entries = build_menu(&[Prompt::custom("Shorten", "Shorten:")]);
        let ids: Vec<&str> = entries.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["lifeinkMenu", "fix_grammar", "improve_writing", "summarize", "analyze", "shorten"]
        );
        assert_eq!(entries[0].parent_id, None);
        assert!(entries[1..]
            .iter()
            .all(|entry| entry.parent_id.as_deref() == Some(MENU_ROOT_ID)));
        assert!(entries.iter().all(|entry| entry.contexts == vec!["selection".to_string()]));
    }

    #[tokio::test]
    async fn rebuild_clears_first() {
        let menu = RecordingMenu::default();
        let created = rebuild(&menu, &[]).await.expect("rebuild should succeed");
        assert_eq!(created, 5);
        assert_eq!(menu.log.lock().expect("log lock")[0], "clear");
    }

    #[tokio::test]
    async fn unrelated_setting_change_does_not_rebuild() {
        let menu = RecordingMenu::default();
        let previous = Settings::default();
        let toggled = Settings {
            show_diff: true,
            ..Settings::default()
        };
        assert!(!on_settings_changed(&menu, &previous, &toggled).await);
        assert!(menu.log.lock().expect("log lock").is_empty());

        let with_prompt = Settings {
            custom_prompts: vec![Prompt::custom("Shorten", "Shorten:")],
            ..Settings::default()
        };
        assert!(on_settings_changed(&menu, &previous, &with_prompt).await);
        assert_eq!(menu.log.lock().expect("log lock").len(), 7);
    }
}
