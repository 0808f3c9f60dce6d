//! LLM Provider trait and types
//!
//! Defines the common interface for the text-generation backends (embedded
//! sidecar, Ollama) and the single error type model work can produce.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker prepended to failures when a result has to cross a plain-string boundary
pub const ERROR_MARKER: &str = "Error:";

/// Error types for model operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ModelError {
    /// Model not found or not downloaded
    ModelNotFound(String),
    /// Model failed to load
    ModelLoadFailed(String),
    /// Provider not available (e.g., Ollama not running, sidecar missing)
    ProviderUnavailable(String),
    /// Transport to the engine failed
    RequestFailed(String),
    /// Invalid request parameters
    InvalidRequest(String),
    /// The engine reported a failure while generating
    InferenceFailed(String),
    /// The engine finished without producing any text
    EmptyOutput,
    /// Prompt content exceeded the configured budget
    PromptRejected { length: usize, limit: usize },
    /// The engine panicked; the payload message is kept
    EnginePanic(String),
    /// Provider not initialized
    NotInitialized,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ModelError::ModelLoadFailed(msg) => write!(f, "Failed to load model: {}", msg),
            ModelError::ProviderUnavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            ModelError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            ModelError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ModelError::InferenceFailed(msg) => write!(f, "Inference failed: {}", msg),
            ModelError::EmptyOutput => write!(f, "Model returned no text"),
            ModelError::PromptRejected { length, limit } => write!(
                f,
                "Input too large: {} characters (limit {})",
                length, limit
            ),
            ModelError::EnginePanic(msg) => write!(f, "Generation engine crashed: {}", msg),
            ModelError::NotInitialized => write!(f, "Provider not initialized"),
        }
    }
}

impl std::error::Error for ModelError {}

/// Result of one gateway call: generated text or the reason there is none
pub type ModelResponse = Result<String, ModelError>;

/// Render a response for a shell that only understands strings.
pub fn display_text(response: &ModelResponse) -> String {
    match response {
        Ok(text) => text.clone(),
        Err(e) => format!("{} {}", ERROR_MARKER, e),
    }
}

/// Decoding options understood by every provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationOptions {
    /// Upper bound on newly generated tokens
    pub max_length: u32,
    /// Stochastic decoding; greedy when false
    pub do_sample: bool,
    /// Size of the sampling candidate pool
    pub top_k: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_length: 200,
            do_sample: true,
            top_k: 50,
        }
    }
}

/// A rendered prompt plus the options to run it with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            prompt: prompt.into(),
            options,
        }
    }
}

/// Response from a generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// First generated continuation
    pub text: String,
    /// Model that generated the response
    pub model: String,
    /// Number of tokens in the prompt, when the backend reports it
    pub prompt_tokens: Option<u32>,
    /// Number of tokens generated, when the backend reports it
    pub completion_tokens: Option<u32>,
}

/// Capabilities of a provider
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderCapabilities {
    /// Is an embedded/local provider (no network required)
    pub embedded: bool,
    /// Honors `top_k`
    pub top_k_sampling: bool,
    /// Can run greedy decoding when sampling is disabled
    pub deterministic: bool,
}

/// The trait every text-generation backend implements
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "embedded", "ollama")
    fn provider_name(&self) -> &'static str;

    /// Get provider capabilities
    fn capabilities(&self) -> ProviderCapabilities;

    /// Load or select the model. May take seconds.
    async fn initialize(&self, model_id: &str) -> Result<(), ModelError>;

    /// Check if the provider can serve requests
    async fn is_ready(&self) -> bool;

    /// Get the currently loaded model ID
    async fn current_model(&self) -> Option<String>;

    /// Run one generation
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ModelError>;

    /// Release the engine
    async fn shutdown(&self) -> Result<(), ModelError>;
}

/// Provider type enum for serialization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    #[default]
    Embedded,
    Ollama,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Embedded => write!(f, "Embedded (mistral.rs)"),
            ProviderType::Ollama => write!(f, "Ollama"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" | "sidecar" => Ok(ProviderType::Embedded),
            "ollama" => Ok(ProviderType::Ollama),
            other => Err(ModelError::ProviderUnavailable(format!(
                "Unknown provider '{}'",
                other
            ))),
        }
    }
}
