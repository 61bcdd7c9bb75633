use serde::{Deserialize, Serialize};
use std::fmt;

pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o-2024-08-06",
    "gpt-4o-2024-05-13",
    "gpt-4-turbo-2024-04-09",
    "gpt-4-0125-preview",
    "gpt-4-1106-preview",
];

pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20240620",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
];

pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";

/// Model providers whose credentials the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::OpenAi, Provider::Anthropic];

    /// Variable read from the host environment in single-tenant mode.
    pub fn host_env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Per-repository variable read in multi-tenant mode.
    pub fn repository_variable(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Variable name the engine reads its credential from.
    pub fn engine_env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Map a model name to the provider that serves it.
///
/// Catalogued names are matched exactly; anything else falls back to the
/// provider's naming convention.
pub fn provider_for(model: &str) -> Option<Provider> {
    let model = model.trim();
    if OPENAI_MODELS.contains(&model) {
        return Some(Provider::OpenAi);
    }
    if ANTHROPIC_MODELS.contains(&model) {
        return Some(Provider::Anthropic);
    }
    if model.starts_with("gpt-") || model.starts_with("o1") {
        return Some(Provider::OpenAi);
    }
    if model.starts_with("claude-") {
        return Some(Provider::Anthropic);
    }
    None
}

pub fn is_catalogued(model: &str) -> bool {
    OPENAI_MODELS.contains(&model) || ANTHROPIC_MODELS.contains(&model)
}
