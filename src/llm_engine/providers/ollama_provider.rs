//! Ollama API provider
//!
//! Connects to a running Ollama server (default: localhost:11434) and uses the
//! raw completion endpoint, so prompts reach the model exactly as rendered.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::llm_engine::provider::{
    GenerationOptions, GenerationRequest, GenerationResponse, LlmProvider, ModelError,
    ProviderCapabilities,
};

/// Ollama generate request
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    /// Skip the model's prompt template
    raw: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, PartialEq)]
struct OllamaOptions {
    num_predict: u32,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl From<GenerationOptions> for OllamaOptions {
    fn from(options: GenerationOptions) -> Self {
        Self {
            num_predict: options.max_length,
            top_k: options.top_k,
            // Ollama has no sampling switch; zero temperature is greedy
            temperature: if options.do_sample { None } else { Some(0.0) },
        }
    }
}

/// Ollama generate response
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    model: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama model list response
#[derive(Debug, Deserialize)]
struct OllamaModelList {
    models: Vec<OllamaModelEntry>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelEntry {
    name: String,
}

/// Ollama version response
#[derive(Debug, Deserialize)]
struct OllamaVersion {
    version: String,
}

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: 300,
        }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    config: OllamaConfig,
    client: Client,
    current_model: Arc<RwLock<Option<String>>>,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ModelError::ProviderUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            config,
            client,
            current_model: Arc::new(RwLock::new(None)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Check if Ollama server is running
    pub async fn check_connection(&self) -> Result<String, ModelError> {
        let response = self
            .client
            .get(self.url("/api/version"))
            .send()
            .await
            .map_err(|e| ModelError::ProviderUnavailable(format!("Cannot connect to Ollama: {}", e)))?;

        if !response.status().is_success() {
            return Err(ModelError::ProviderUnavailable(
                "Ollama server returned error".to_string(),
            ));
        }

        let version: OllamaVersion = response
            .json()
            .await
            .map_err(|e| ModelError::ProviderUnavailable(format!("Invalid response: {}", e)))?;

        Ok(version.version)
    }

    async fn list_model_names(&self) -> Result<Vec<String>, ModelError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| ModelError::ProviderUnavailable(format!("Cannot connect to Ollama: {}", e)))?;

        if !response.status().is_success() {
            return Err(ModelError::RequestFailed(
                "Failed to list Ollama models".to_string(),
            ));
        }

        let model_list: OllamaModelList = response
            .json()
            .await
            .map_err(|e| ModelError::RequestFailed(format!("Invalid response: {}", e)))?;

        Ok(model_list.models.into_iter().map(|m| m.name).collect())
    }
}

/// Ollama reports `gpt2` as `gpt2:latest`
fn same_model(listed: &str, wanted: &str) -> bool {
    listed == wanted || (!wanted.contains(':') && listed == format!("{}:latest", wanted))
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            embedded: false,
            top_k_sampling: true,
            deterministic: true,
        }
    }

    async fn initialize(&self, model_id: &str) -> Result<(), ModelError> {
        let version = self.check_connection().await?;
        log::debug!("Connected to Ollama {}", version);

        let models = self.list_model_names().await?;
        if !models.iter().any(|m| same_model(m, model_id)) {
            return Err(ModelError::ModelNotFound(format!(
                "Model '{}' not found in Ollama. Available models: {:?}",
                model_id, models
            )));
        }

        *self.current_model.write().await = Some(model_id.to_string());

        log::info!("Ollama provider initialized with model: {}", model_id);
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.current_model.read().await.is_some() && self.check_connection().await.is_ok()
    }

    async fn current_model(&self) -> Option<String> {
        self.current_model.read().await.clone()
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ModelError> {
        let model = self
            .current_model
            .read()
            .await
            .clone()
            .ok_or(ModelError::NotInitialized)?;

        let body = OllamaGenerateRequest {
            model,
            prompt: request.prompt,
            stream: false,
            raw: true,
            options: request.options.into(),
        };

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::RequestFailed(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::InferenceFailed(format!(
                "Ollama returned error: {}",
                error_text
            )));
        }

        let generated: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::RequestFailed(format!("Invalid response: {}", e)))?;

        Ok(GenerationResponse {
            text: generated.response,
            model: generated.model,
            prompt_tokens: generated.prompt_eval_count,
            completion_tokens: generated.eval_count,
        })
    }

    async fn shutdown(&self) -> Result<(), ModelError> {
        *self.current_model.write().await = None;
        log::info!("Ollama provider shut down");
        Ok(())
    }
}
