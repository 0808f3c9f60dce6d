//! LLM Sidecar Binary
//!
//! Runs as a separate process to host the embedded text-generation model
//! using mistral.rs. Communicates with the assistant via JSON-RPC over
//! stdin/stdout, one request per line.
//!
//! A panic while loading or generating kills only this process; the
//! assistant sees the closed pipe and reports the engine as unavailable.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use mistralrs::{
    AutoDeviceMapParams, DeviceMapSetting, GgufModelBuilder, MemoryGpuConfig, Model,
    PagedAttentionMetaBuilder, PagedCacheType, RequestBuilder, TextMessageRole,
};

/// Temporarily redirects stdout to stderr during model loading to prevent
/// mistral.rs's println! statements from corrupting our JSON-RPC protocol.
#[cfg(windows)]
mod stdout_redirect {
    use std::os::windows::io::RawHandle;
    use windows_sys::Win32::System::Console::{GetStdHandle, SetStdHandle, STD_OUTPUT_HANDLE, STD_ERROR_HANDLE};

    pub struct StdoutRedirect {
        original_stdout: RawHandle,
    }

    impl StdoutRedirect {
        pub fn to_stderr() -> Option<Self> {
            unsafe {
                let original_stdout = GetStdHandle(STD_OUTPUT_HANDLE);
                let stderr = GetStdHandle(STD_ERROR_HANDLE);
                if SetStdHandle(STD_OUTPUT_HANDLE, stderr as _) != 0 {
                    Some(Self { original_stdout: original_stdout as _ })
                } else {
                    None
                }
            }
        }
    }

    impl Drop for StdoutRedirect {
        fn drop(&mut self) {
            unsafe {
                SetStdHandle(STD_OUTPUT_HANDLE, self.original_stdout as _);
            }
        }
    }
}

#[cfg(not(windows))]
mod stdout_redirect {
    pub struct StdoutRedirect;

    impl StdoutRedirect {
        pub fn to_stderr() -> Option<Self> {
            None
        }
    }
}

/// Anything smaller is not a usable GGUF file
const MIN_MODEL_BYTES: u64 = 10_000_000;

/// Context window the model is loaded with
const MAX_SEQ_LEN: usize = 8192;

/// Temperature used when sampling is requested
const SAMPLING_TEMPERATURE: f64 = 1.0;

const RAW_PROMPT_TEMPLATE_FILE: &str = "llm-sidecar-raw-prompt.jinja";
const RAW_PROMPT_TEMPLATE: &str = "{% for message in messages %}{{ message['content'] }}{% endfor %}";

// ============================================================================
// JSON-RPC Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: u64, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

#[derive(Debug, Error)]
enum SidecarError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error("Invalid params: {0}")]
    InvalidParams(#[from] serde_json::Error),
    #[error("No model loaded")]
    NoModel,
    #[error("{0}")]
    Failed(String),
}

impl SidecarError {
    fn code(&self) -> i32 {
        match self {
            SidecarError::UnknownMethod(_) => -32601,
            SidecarError::InvalidParams(_) => -32602,
            SidecarError::NoModel | SidecarError::Failed(_) => -32000,
        }
    }
}

type HandlerResult = Result<serde_json::Value, SidecarError>;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct InitializeParams {
    /// Local path to the GGUF model file
    model_path: String,
    /// Chat template file; without one the prompt is passed through verbatim
    #[serde(default)]
    chat_template: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListModelsParams {
    models_dir: String,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    id: String,
    name: String,
    size_bytes: u64,
    is_loaded: bool,
}

#[derive(Debug, Deserialize, PartialEq)]
struct GenerateParams {
    prompt: String,
    /// New tokens to produce at most
    #[serde(default = "default_max_length")]
    max_length: usize,
    #[serde(default = "default_do_sample")]
    do_sample: bool,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_max_length() -> usize {
    200
}

fn default_do_sample() -> bool {
    true
}

fn default_top_k() -> usize {
    50
}

/// How the next tokens are picked
#[derive(Debug, PartialEq)]
enum Decoding {
    Sampled { top_k: usize, temperature: f64 },
    Greedy,
}

impl GenerateParams {
    fn decoding(&self) -> Decoding {
        if self.do_sample {
            Decoding::Sampled {
                top_k: self.top_k,
                temperature: SAMPLING_TEMPERATURE,
            }
        } else {
            Decoding::Greedy
        }
    }

    fn request(&self) -> RequestBuilder {
        // The deterministic preset replaces all sampler settings, so it goes first
        let builder = match self.decoding() {
            Decoding::Sampled { top_k, temperature } => RequestBuilder::new()
                .set_sampler_temperature(temperature)
                .set_sampler_topk(top_k),
            Decoding::Greedy => RequestBuilder::new().set_deterministic_sampler(),
        };

        builder
            .set_sampler_max_len(self.max_length)
            .add_message(TextMessageRole::User, &self.prompt)
    }
}

/// Write the template that renders a lone user message verbatim.
///
/// Loaded when no chat template is configured, so the model continues the
/// prompt exactly as the assistant rendered it.
fn write_raw_prompt_template(dir: &std::path::Path) -> Result<PathBuf, SidecarError> {
    let path = dir.join(RAW_PROMPT_TEMPLATE_FILE);
    std::fs::write(&path, RAW_PROMPT_TEMPLATE).map_err(|e| {
        SidecarError::Failed(format!("Failed to write {}: {}", path.display(), e))
    })?;
    Ok(path)
}

// ============================================================================
// LLM State
// ============================================================================

#[derive(Default)]
struct LlmState {
    model: Option<Model>,
    model_id: Option<String>,
}

type SharedState = Arc<RwLock<LlmState>>;

/// Model id shown to the assistant: the file stem of the GGUF
fn model_id_from_path(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn check_model_file(path: &std::path::Path) -> Result<u64, SidecarError> {
    if !path.exists() {
        log::error!("Model file not found: {}", path.display());
        return Err(SidecarError::Failed(format!(
            "Model file not found: {}",
            path.display()
        )));
    }

    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if file_size < MIN_MODEL_BYTES {
        log::error!("Model file too small ({} bytes), likely not a valid GGUF", file_size);
        return Err(SidecarError::Failed(format!(
            "Model file too small ({} bytes), likely not a valid GGUF model",
            file_size
        )));
    }

    Ok(file_size)
}

// ============================================================================
// Handler Functions
// ============================================================================

async fn handle_initialize(state: SharedState, params: InitializeParams) -> HandlerResult {
    log::info!("Initializing model: {}", params.model_path);

    let path = PathBuf::from(&params.model_path);
    let file_size = check_model_file(&path)?;
    log::info!(
        "Model file size: {} bytes ({:.2} GB)",
        file_size,
        file_size as f64 / 1_000_000_000.0
    );

    let chat_template = match params.chat_template {
        Some(template) => template,
        None => write_raw_prompt_template(&std::env::temp_dir())?
            .to_string_lossy()
            .to_string(),
    };

    // mistral.rs prints to stdout while building; keep it off the protocol stream
    let _redirect = stdout_redirect::StdoutRedirect::to_stderr();

    // Unload any existing model first to free GPU memory
    {
        let mut state_guard = state.write().await;
        if state_guard.model.is_some() {
            log::info!("Unloading previous model: {:?}", state_guard.model_id);
            *state_guard = LlmState::default();
        }
    }

    // GgufModelBuilder wants the directory and the bare filename
    let model_dir = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    let model_filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .ok_or_else(|| SidecarError::Failed("Invalid model path - no filename".to_string()))?;
    let model_id = model_id_from_path(&path);

    log::info!("Loading GGUF from dir: {}, file: {}", model_dir, model_filename);

    let device_map_params = AutoDeviceMapParams::Text {
        max_seq_len: MAX_SEQ_LEN,
        max_batch_size: 1,
    };

    let builder = GgufModelBuilder::new(&model_dir, vec![model_filename])
        .with_device_mapping(DeviceMapSetting::Auto(device_map_params))
        .with_paged_attn(|| {
            PagedAttentionMetaBuilder::default()
                .with_block_size(32)
                .with_gpu_memory(MemoryGpuConfig::ContextSize(MAX_SEQ_LEN))
                .with_paged_cache_type(PagedCacheType::F8E4M3)
                .build()
        })
        .map_err(|e| {
            log::error!("Failed to create GgufModelBuilder: {:?}", e);
            SidecarError::Failed(format!("Failed to create model builder: {:?}", e))
        })?;

    log::info!("Using chat template: {}", chat_template);
    let builder = builder.with_chat_template(chat_template);

    log::info!("Building model (this may take a moment)...");
    let model = builder.build().await.map_err(|e| {
        log::error!("Failed to build model: {:?}", e);
        SidecarError::Failed(format!("Failed to load model: {:?}", e))
    })?;

    {
        let mut state_guard = state.write().await;
        state_guard.model = Some(model);
        state_guard.model_id = Some(model_id.clone());
    }

    log::info!("Model loaded successfully: {}", model_id);

    Ok(serde_json::json!({
        "success": true,
        "model_id": model_id,
    }))
}

async fn handle_generate(state: SharedState, params: GenerateParams) -> HandlerResult {
    let state_guard = state.read().await;
    let model = state_guard.model.as_ref().ok_or(SidecarError::NoModel)?;
    let model_id = state_guard
        .model_id
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    log::info!(
        "Generating: {} prompt chars, max_length={}, do_sample={}, top_k={}",
        params.prompt.len(),
        params.max_length,
        params.do_sample,
        params.top_k
    );

    let response = model
        .send_chat_request(params.request())
        .await
        .map_err(|e| SidecarError::Failed(format!("Failed to generate: {:?}", e)))?;

    let text = response
        .choices
        .first()
        .and_then(|c| c.message.content.as_ref())
        .cloned()
        .unwrap_or_default();

    log::debug!("Generated {} chars", text.len());

    Ok(serde_json::json!({
        "done": true,
        "text": text,
        "model": model_id,
    }))
}

async fn handle_list_models(state: SharedState, params: ListModelsParams) -> HandlerResult {
    let models_dir = PathBuf::from(&params.models_dir);
    let loaded_id = state.read().await.model_id.clone();
    let mut models = Vec::new();

    if let Ok(entries) = std::fs::read_dir(&models_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "gguf").unwrap_or(false) {
                let id = model_id_from_path(&path);
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let is_loaded = loaded_id.as_ref() == Some(&id);

                models.push(ModelInfo {
                    id: id.clone(),
                    name: id,
                    size_bytes: size,
                    is_loaded,
                });
            }
        }
    }

    models.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(serde_json::to_value(models)?)
}

async fn handle_current_model(state: SharedState) -> HandlerResult {
    let state_guard = state.read().await;
    Ok(serde_json::json!({
        "model_id": state_guard.model_id
    }))
}

async fn handle_is_ready(state: SharedState) -> HandlerResult {
    let state_guard = state.read().await;
    Ok(serde_json::json!({
        "ready": state_guard.model.is_some()
    }))
}

async fn handle_shutdown(state: SharedState) -> HandlerResult {
    log::info!("Shutting down...");
    *state.write().await = LlmState::default();

    Ok(serde_json::json!({
        "success": true
    }))
}

// ============================================================================
// Main Loop
// ============================================================================

async fn process_request(state: SharedState, request: JsonRpcRequest) -> JsonRpcResponse {
    let result = match request.method.as_str() {
        "initialize" => match serde_json::from_value(request.params) {
            Ok(params) => handle_initialize(state, params).await,
            Err(e) => Err(e.into()),
        },
        "generate" => match serde_json::from_value(request.params) {
            Ok(params) => handle_generate(state, params).await,
            Err(e) => Err(e.into()),
        },
        "list_models" => match serde_json::from_value(request.params) {
            Ok(params) => handle_list_models(state, params).await,
            Err(e) => Err(e.into()),
        },
        "current_model" => handle_current_model(state).await,
        "is_ready" => handle_is_ready(state).await,
        "shutdown" => handle_shutdown(state).await,
        other => Err(SidecarError::UnknownMethod(other.to_string())),
    };

    match result {
        Ok(value) => JsonRpcResponse::success(request.id, value),
        Err(e) => JsonRpcResponse::error(request.id, e.code(), e.to_string()),
    }
}

fn write_response(response: &JsonRpcResponse) {
    let line = match serde_json::to_string(response) {
        Ok(line) => line,
        Err(e) => {
            log::error!("Failed to serialize response {}: {}", response.id, e);
            return;
        }
    };

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", line) {
        log::error!("Failed to write response: {}", e);
    }
    let _ = handle.flush();
}

#[tokio::main]
async fn main() {
    // Panics go to stderr; the assistant sees the pipe close
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("LLM Sidecar PANIC: {}", panic_info);
        if let Some(location) = panic_info.location() {
            eprintln!("  at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // Logging goes to stderr (stdout is for JSON-RPC)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("llm_sidecar=info,mistralrs=info,mistralrs_core=info,candle=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    log::info!("LLM Sidecar starting (using mistral.rs)...");

    let state: SharedState = Arc::new(RwLock::new(LlmState::default()));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::error!("Failed to read line: {}", e);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                log::error!("Failed to parse request: {}", e);
                write_response(&JsonRpcResponse::error(0, -32700, format!("Parse error: {}", e)));
                continue;
            }
        };

        log::debug!("Received request: {} (id={})", request.method, request.id);

        let response = process_request(state.clone(), request).await;
        write_response(&response);
    }

    log::info!("LLM Sidecar shutting down");
}
