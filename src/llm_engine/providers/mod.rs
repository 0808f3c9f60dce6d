//! LLM Provider implementations
//!
//! Each provider implements the LlmProvider trait for a specific backend

pub mod ollama_provider;
pub mod sidecar_provider;

pub use ollama_provider::{OllamaConfig, OllamaProvider};
pub use sidecar_provider::{SidecarConfig, SidecarProvider};
