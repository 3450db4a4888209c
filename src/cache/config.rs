//! Invalidation pipeline configuration.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_DEBOUNCE_MS: u64 = 100;
const DEFAULT_RELATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LANGUAGES: [&str; 2] = ["en", "zh"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Quiet period (ms) before a queued batch is processed.
    pub debounce_ms: u64,
    /// Upper bound (ms) on each indirect relationship lookup.
    pub relation_timeout_ms: u64,
    /// Site languages used to expand language-agnostic paths. The first one is the default.
    pub languages: Vec<String>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            relation_timeout_ms: DEFAULT_RELATION_TIMEOUT_MS,
            languages: DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl From<&crate::config::Settings> for InvalidationConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            debounce_ms: settings.invalidation.debounce.as_millis() as u64,
            relation_timeout_ms: settings.cms.relation_timeout.as_millis() as u64,
            languages: settings.invalidation.languages.clone(),
        }
    }
}

impl InvalidationConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn relation_timeout(&self) -> Duration {
        Duration::from_millis(self.relation_timeout_ms)
    }

    pub fn default_language(&self) -> &str {
        self.languages
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_LANGUAGES[0])
    }
}
