use serde::Deserialize;

use super::guard::CallerScope;

/// Instruction texts for the chat pipeline, kept in `prompts.toml` so they
/// can be tuned without a rebuild.
#[derive(Debug, Clone, Deserialize)]
pub struct Prompts {
    pub chat: ChatPrompts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatPrompts {
    pub system: String,
    pub analytics: String,
}

impl Prompts {
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// The decision instruction with the caller's scope baked in.
    pub fn render_system(&self, scope: &CallerScope) -> String {
        self.chat
            .system
            .replace("{company_id}", &scope.company_id.to_string())
            .replace("{manager_id}", &scope.manager_id.unwrap_or(0).to_string())
    }
}
