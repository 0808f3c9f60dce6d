//! LLM Engine module: the shared text-generation gateway
//!
//! Supports two backends:
//! - Embedded inference via the llm-sidecar process (mistral.rs, GGUF models)
//! - Ollama API (requires running Ollama server)

pub mod gateway;
pub mod provider;
pub mod providers;

#[cfg(test)]
pub(crate) mod testing;

pub use gateway::{GatewayCell, ModelGateway};
pub use provider::{
    display_text, GenerationOptions, GenerationRequest, GenerationResponse, LlmProvider,
    ModelError, ModelResponse, ProviderCapabilities, ProviderType, ERROR_MARKER,
};
