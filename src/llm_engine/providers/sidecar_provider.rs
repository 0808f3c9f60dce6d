//! Sidecar LLM provider
//!
//! Runs GGUF inference in a separate `llm-sidecar` process so a crash or a
//! stray `println!` inside the engine cannot take the assistant down.
//! Communicates via JSON-RPC over stdin/stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing
#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use crate::llm_engine::provider::{
    GenerationRequest, GenerationResponse, LlmProvider, ModelError, ProviderCapabilities,
};

// ============================================================================
// JSON-RPC Types (matching sidecar)
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    params: serde_json::Value,
}

impl JsonRpcRequest {
    fn new(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// `generate` result sent back by the sidecar
#[derive(Debug, Deserialize)]
struct GenerateResult {
    text: String,
    #[serde(default)]
    model: Option<String>,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory where GGUF models are stored
    pub models_dir: PathBuf,
    /// Path to the sidecar binary
    pub sidecar_path: Option<PathBuf>,
    /// Chat template handed to the sidecar when loading
    pub chat_template: Option<String>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            models_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("smart-city-assistant")
                .join("llm_models"),
            sidecar_path: None,
            chat_template: None,
        }
    }
}

// ============================================================================
// Sidecar Process Manager
// ============================================================================

struct SidecarProcess {
    child: Child,
    stdin: tokio::process::ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    request_id: u64,
}

impl SidecarProcess {
    async fn send_request(&mut self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, ModelError> {
        self.request_id += 1;
        let request = JsonRpcRequest::new(self.request_id, method, params);

        let request_json = serde_json::to_string(&request)
            .map_err(|e| ModelError::RequestFailed(format!("Failed to serialize request: {}", e)))?;

        self.stdin
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| ModelError::RequestFailed(format!("Failed to write to sidecar: {}", e)))?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ModelError::RequestFailed(format!("Failed to write newline: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ModelError::RequestFailed(format!("Failed to flush: {}", e)))?;

        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| ModelError::RequestFailed(format!("Failed to read from sidecar: {}", e)))?;
        if read == 0 {
            return Err(ModelError::ProviderUnavailable(
                "LLM sidecar exited unexpectedly".to_string(),
            ));
        }

        let response: JsonRpcResponse = serde_json::from_str(&line)
            .map_err(|e| ModelError::RequestFailed(format!("Failed to parse response: {}", e)))?;

        if response.id != self.request_id {
            log::warn!(
                "Sidecar answered request {} while waiting for {}",
                response.id,
                self.request_id
            );
        }

        if let Some(error) = response.error {
            log::debug!("Sidecar error {}: {}", error.code, error.message);
            return Err(ModelError::InferenceFailed(error.message));
        }

        response.result.ok_or_else(|| ModelError::RequestFailed("Empty response".to_string()))
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

pub struct SidecarProvider {
    config: SidecarConfig,
    process: Arc<RwLock<Option<SidecarProcess>>>,
    current_model: Arc<RwLock<Option<String>>>,
}

impl SidecarProvider {
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            process: Arc::new(RwLock::new(None)),
            current_model: Arc::new(RwLock::new(None)),
        }
    }

    fn model_path(&self, model_id: &str) -> PathBuf {
        self.config.models_dir.join(format!("{}.gguf", model_id))
    }

    /// Find the sidecar binary path
    fn find_sidecar_path(&self) -> Result<PathBuf, ModelError> {
        if let Some(ref path) = self.config.sidecar_path {
            if path.exists() {
                return Ok(path.clone());
            }
            log::warn!("Configured sidecar path does not exist: {}", path.display());
        }

        let sidecar_name = if cfg!(windows) {
            "llm-sidecar.exe"
        } else {
            "llm-sidecar"
        };

        if let Ok(exe_path) = std::env::current_exe() {
            let exe_dir = exe_path.parent().unwrap_or(Path::new("."));

            // Same directory as the main exe (workspace build or installed)
            let path = exe_dir.join(sidecar_name);
            if path.exists() {
                log::debug!("Found sidecar in exe dir: {}", path.display());
                return Ok(path);
            }

            // Dev builds: look in target/{debug,release} of parent directories
            let mut current = exe_dir;
            for _ in 0..3 {
                if let Some(parent) = current.parent() {
                    for profile in &["debug", "release"] {
                        let path = parent.join("target").join(profile).join(sidecar_name);
                        if path.exists() {
                            log::debug!("Found sidecar at: {}", path.display());
                            return Ok(path);
                        }
                    }
                    current = parent;
                }
            }
        }

        Err(ModelError::ProviderUnavailable(
            "LLM sidecar binary not found. Please build it with: cargo build -p llm-sidecar".to_string()
        ))
    }

    /// Start the sidecar process
    async fn start_sidecar(&self) -> Result<(), ModelError> {
        let sidecar_path = self.find_sidecar_path()?;

        log::info!("Starting LLM sidecar: {}", sidecar_path.display());

        let mut cmd = Command::new(&sidecar_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn()
            .map_err(|e| ModelError::ProviderUnavailable(format!("Failed to start sidecar: {}", e)))?;

        let stdin = child.stdin.take()
            .ok_or_else(|| ModelError::ProviderUnavailable("Failed to get sidecar stdin".to_string()))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| ModelError::ProviderUnavailable("Failed to get sidecar stdout".to_string()))?;

        let process = SidecarProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            request_id: 0,
        };

        *self.process.write().await = Some(process);

        log::info!("LLM sidecar started successfully");
        Ok(())
    }

    /// Ensure sidecar is running
    async fn ensure_sidecar(&self) -> Result<(), ModelError> {
        let running = self.process.read().await.is_some();
        if !running {
            self.start_sidecar().await?;
        }
        Ok(())
    }

    /// Forget a dead process so the next request respawns it
    async fn discard_process(&self) {
        if let Some(mut process) = self.process.write().await.take() {
            let _ = process.child.start_kill();
        }
        *self.current_model.write().await = None;
    }

    /// Ask the sidecar to load `<models_dir>/<model_id>.gguf`
    async fn load_model(&self, model_id: &str) -> Result<(), ModelError> {
        let model_path = self.model_path(model_id);
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        self.ensure_sidecar().await?;

        let params = initialize_params(&model_path, self.config.chat_template.as_deref());

        let result = {
            let mut guard = self.process.write().await;
            let process = guard.as_mut().ok_or(ModelError::NotInitialized)?;
            process.send_request("initialize", params).await
        };

        let result = match result {
            Ok(value) => value,
            Err(ModelError::ProviderUnavailable(msg)) => {
                self.discard_process().await;
                return Err(ModelError::ModelLoadFailed(msg));
            }
            Err(e) => return Err(ModelError::ModelLoadFailed(e.to_string())),
        };

        if result.get("success").and_then(|s| s.as_bool()).unwrap_or(false) {
            *self.current_model.write().await = Some(model_id.to_string());
            log::info!("Model {} loaded successfully", model_id);
            Ok(())
        } else {
            Err(ModelError::ModelLoadFailed("Sidecar failed to load model".to_string()))
        }
    }
}

fn initialize_params(model_path: &Path, chat_template: Option<&str>) -> serde_json::Value {
    let mut params = serde_json::json!({
        "model_path": model_path.to_string_lossy()
    });
    if let Some(template) = chat_template {
        params["chat_template"] = serde_json::Value::String(template.to_string());
    }
    params
}

fn generate_params(request: &GenerationRequest) -> serde_json::Value {
    serde_json::json!({
        "prompt": request.prompt,
        "max_length": request.options.max_length,
        "do_sample": request.options.do_sample,
        "top_k": request.options.top_k,
    })
}

#[async_trait]
impl LlmProvider for SidecarProvider {
    fn provider_name(&self) -> &'static str {
        "embedded"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            embedded: true,
            top_k_sampling: true,
            deterministic: true,
        }
    }

    async fn is_ready(&self) -> bool {
        self.current_model.read().await.is_some()
    }

    async fn initialize(&self, model_id: &str) -> Result<(), ModelError> {
        {
            let current = self.current_model.read().await;
            if current.as_deref() == Some(model_id) {
                log::info!("Model {} already loaded", model_id);
                return Ok(());
            }
        }

        let loaded = self.load_model(model_id).await;
        if loaded.is_err() {
            // The sidecar drops its old model before loading a new one
            *self.current_model.write().await = None;
        }
        loaded
    }

    async fn current_model(&self) -> Option<String> {
        self.current_model.read().await.clone()
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ModelError> {
        let model_id = self
            .current_model
            .read()
            .await
            .clone()
            .ok_or(ModelError::NotInitialized)?;

        let result = {
            let mut guard = self.process.write().await;
            let process = guard.as_mut().ok_or(ModelError::NotInitialized)?;
            process.send_request("generate", generate_params(&request)).await
        };

        let result = match result {
            Ok(value) => value,
            Err(e @ ModelError::ProviderUnavailable(_)) => {
                // The process died mid-request; the model has to be loaded again
                self.discard_process().await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let generated: GenerateResult = serde_json::from_value(result)
            .map_err(|e| ModelError::RequestFailed(format!("Invalid generate result: {}", e)))?;

        Ok(GenerationResponse {
            text: generated.text,
            model: generated.model.unwrap_or(model_id),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    async fn shutdown(&self) -> Result<(), ModelError> {
        let mut guard = self.process.write().await;
        if let Some(mut process) = guard.take() {
            let _ = process.send_request("shutdown", serde_json::json!({})).await;
            let _ = process.child.kill().await;
        }

        *self.current_model.write().await = None;
        log::info!("Sidecar provider shut down");
        Ok(())
    }
}
