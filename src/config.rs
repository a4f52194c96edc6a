use crate::persistence::DebounceDelays;
use crate::storage::StorageConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR_NAME: &str = "studiochat";
const DATA_DIR_ENV: &str = "STUDIOCHAT_DATA_DIR";
const SESSIONS_DEBOUNCE_ENV: &str = "STUDIOCHAT_SESSIONS_DEBOUNCE_MS";
const SETTINGS_DEBOUNCE_ENV: &str = "STUDIOCHAT_SETTINGS_DEBOUNCE_MS";
const FORCE_FALLBACK_ENV: &str = "STUDIOCHAT_FORCE_FALLBACK";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Runtime configuration for the workspace core.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base directory; documents go in `data/`, the fallback database next to it.
    pub data_dir: PathBuf,
    pub debounce: DebounceDelays,
    pub force_fallback: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            debounce: DebounceDelays::default(),
            force_fallback: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

impl AppConfig {
    /// Defaults overridden by `STUDIOCHAT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(DATA_DIR_ENV) {
            log::debug!("Data directory overridden by {}: {}", DATA_DIR_ENV, dir);
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(SESSIONS_DEBOUNCE_ENV) {
            config.debounce.sessions = parse_millis(SESSIONS_DEBOUNCE_ENV, &ms)?;
        }
        if let Some(ms) = lookup(SETTINGS_DEBOUNCE_ENV) {
            // Settings and instructions share the short interval
            let delay = parse_millis(SETTINGS_DEBOUNCE_ENV, &ms)?;
            config.debounce.settings = delay;
            config.debounce.instructions = delay;
        }
        if let Some(flag) = lookup(FORCE_FALLBACK_ENV) {
            config.force_fallback = matches!(flag.trim(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("data")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite", APP_DIR_NAME))
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            documents_dir: self.documents_dir(),
            database_path: Some(self.database_path()),
            force_fallback: self.force_fallback,
        }
    }
}

fn parse_millis(name: &str, raw: &str) -> Result<Duration> {
    let ms: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number of milliseconds, got '{}'", name, raw))?;
    Ok(Duration::from_millis(ms))
}

// --- API Key Retrieval ---

/// The key stored in settings wins; otherwise `OPENAI_API_KEY` from the environment.
/// An empty result is passed through and reported by the completion service.
pub fn resolve_api_key(settings_key: &str) -> String {
    resolve_api_key_with(settings_key, |name| std::env::var(name).ok())
}

fn resolve_api_key_with(settings_key: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    if !settings_key.trim().is_empty() {
        return settings_key.trim().to_string();
    }
    match lookup(API_KEY_ENV) {
        Some(key) if !key.trim().is_empty() => {
            log::debug!("Using API key from environment variable: {}", API_KEY_ENV);
            key.trim().to_string()
        }
        _ => String::new(),
    }
}
