//! Assistant configuration
//!
//! Loaded once at startup from a JSON file, then adjusted by environment
//! variables. Everything has a default so an absent file is fine.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::llm_engine::provider::{GenerationOptions, ModelError, ProviderType};

const APP_DIR: &str = "smart-city-assistant";
const CONFIG_FILE: &str = "config.json";

pub const ENV_CONFIG_PATH: &str = "SMART_CITY_CONFIG";
pub const ENV_PROVIDER: &str = "SMART_CITY_PROVIDER";
pub const ENV_MODEL: &str = "SMART_CITY_MODEL";
pub const ENV_MODELS_DIR: &str = "SMART_CITY_MODELS_DIR";
pub const ENV_OLLAMA_URL: &str = "SMART_CITY_OLLAMA_URL";

/// GGUF stem of the small instruct model the embedded engine loads by default
pub const DEFAULT_MODEL_ID: &str = "qwen2.5-0.5b-instruct-q4_k_m";

/// What to do when user content is larger than the budget
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the first `max_content_chars` characters
    #[default]
    Truncate,
    /// Refuse with `ModelError::PromptRejected`, no engine call
    Reject,
    /// Send everything and let the engine decide
    PassThrough,
}

/// Size limit applied to user-supplied content before it is put into a prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptBudget {
    pub max_content_chars: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            max_content_chars: 12_000,
            overflow: OverflowPolicy::Truncate,
        }
    }
}

impl PromptBudget {
    /// Fit `content` into the budget. Counts characters, never splits one.
    pub fn fit<'a>(&self, content: &'a str) -> Result<Cow<'a, str>, ModelError> {
        let length = content.chars().count();
        if length <= self.max_content_chars {
            return Ok(Cow::Borrowed(content));
        }

        match self.overflow {
            OverflowPolicy::PassThrough => Ok(Cow::Borrowed(content)),
            OverflowPolicy::Reject => Err(ModelError::PromptRejected {
                length,
                limit: self.max_content_chars,
            }),
            OverflowPolicy::Truncate => {
                log::warn!(
                    "Truncating prompt content from {} to {} characters",
                    length,
                    self.max_content_chars
                );
                let cut = content
                    .char_indices()
                    .nth(self.max_content_chars)
                    .map(|(idx, _)| idx)
                    .unwrap_or(content.len());
                Ok(Cow::Borrowed(&content[..cut]))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Backend that hosts the generation engine
    pub provider: ProviderType,
    /// GGUF file stem for the embedded provider, model tag for Ollama
    pub model_id: String,
    /// Directory where GGUF models are stored
    pub models_dir: PathBuf,
    /// Explicit path to the llm-sidecar binary
    pub sidecar_path: Option<PathBuf>,
    /// Optional chat template handed to the sidecar on load
    pub chat_template: Option<String>,
    pub ollama_url: String,
    pub ollama_timeout_secs: u64,
    /// Options used by every module call
    pub generation: GenerationOptions,
    pub prompt_budget: PromptBudget,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Embedded,
            model_id: DEFAULT_MODEL_ID.to_string(),
            models_dir: default_data_dir().join("llm_models"),
            sidecar_path: None,
            chat_template: None,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_timeout_secs: 300,
            generation: GenerationOptions::default(),
            prompt_budget: PromptBudget::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// `<config_dir>/smart-city-assistant/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

impl AssistantConfig {
    /// Read a config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Resolve the configuration the shell runs with.
    ///
    /// An explicit path (argument or `SMART_CITY_CONFIG`) must exist; the
    /// per-user default file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from);

        let mut config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    log::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SMART_CITY_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup(ENV_PROVIDER) {
            self.provider = provider
                .parse()
                .with_context(|| format!("Invalid {}", ENV_PROVIDER))?;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.model_id = model;
        }
        if let Some(dir) = lookup(ENV_MODELS_DIR) {
            self.models_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_OLLAMA_URL) {
            self.ollama_url = url;
        }
        Ok(())
    }
}
