// Smart City Assistant - core library
//
// Modules:
// - Model gateway: one lazily loaded text-generation engine per process
// - Prompt templates for each assistant module
// - Chat transcript, KPI tables and citizen feedback
// - JSON-RPC shell commands

pub mod assistant;
pub mod chat;
pub mod commands;
pub mod config;
pub mod feedback;
pub mod globals;
pub mod llm_engine;
pub mod table;
pub mod templates;

pub use commands::{JsonRpcRequest, JsonRpcResponse, ShellSession};
pub use config::AssistantConfig;
pub use llm_engine::{ModelError, ModelGateway, ModelResponse};
