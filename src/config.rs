use std::path::PathBuf;
use std::time::Duration;

use crate::types::Theme;

pub const DEFAULT_AI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GRAMMAR_BASE_URL: &str = "https://api.languagetool.org";
pub const DEFAULT_GRAMMAR_LANGUAGE: &str = "en-US";

/// Quiet period after the last collection mutation before it is written.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Environment-provided settings. Values persisted by the user take
/// precedence where both exist (see `AppState::load`).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub ai_base_url: String,
    pub ai_model: String,
    /// Fallback credential for the AI collaborator. Never persisted.
    pub ai_api_key: Option<String>,
    pub grammar_base_url: String,
    pub grammar_language: String,
    pub theme: Theme,
    pub save_debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            ai_base_url: DEFAULT_AI_BASE_URL.to_string(),
            ai_model: DEFAULT_AI_MODEL.to_string(),
            ai_api_key: None,
            grammar_base_url: DEFAULT_GRAMMAR_BASE_URL.to_string(),
            grammar_language: DEFAULT_GRAMMAR_LANGUAGE.to_string(),
            theme: Theme::Light,
            save_debounce: SAVE_DEBOUNCE,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            db_path: get("NOTEVAULT_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            ai_base_url: get("NOTEVAULT_AI_BASE_URL").unwrap_or(defaults.ai_base_url),
            ai_model: get("NOTEVAULT_AI_MODEL").unwrap_or(defaults.ai_model),
            ai_api_key: get("NOTEVAULT_AI_API_KEY"),
            grammar_base_url: get("NOTEVAULT_GRAMMAR_BASE_URL").unwrap_or(defaults.grammar_base_url),
            grammar_language: get("NOTEVAULT_GRAMMAR_LANGUAGE")
                .unwrap_or(defaults.grammar_language),
            theme: get("NOTEVAULT_THEME")
                .and_then(|t| Theme::parse(&t))
                .unwrap_or(defaults.theme),
            save_debounce: defaults.save_debounce,
        }
    }
}

/// `$HOME/.local/share/notevault/notes.sqlite`, or `./notes.sqlite` without a home.
fn default_db_path() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home)
            .join(".local/share/notevault")
            .join("notes.sqlite"),
        _ => PathBuf::from("notes.sqlite"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn blank_credential_disables_ai() {
        let env: HashMap<&str, &str> = [
            ("NOTEVAULT_AI_API_KEY", "   "),
            ("NOTEVAULT_AI_MODEL", "local-model"),
            ("NOTEVAULT_THEME", "Dark"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.ai_api_key, None);
        assert_eq!(config.ai_model, "local-model");
        assert_eq!(config.theme, Theme::Dark);
        assert_eq!(config.grammar_language, DEFAULT_GRAMMAR_LANGUAGE);
        assert_eq!(config.save_debounce, Duration::from_millis(500));
    }
}
