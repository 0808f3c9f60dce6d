//! Model Gateway - the one entry point to the shared generation engine
//!
//! Every failure inside a provider, including a panic, is turned into a
//! `ModelError` here and nowhere else.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::{Mutex, OnceCell};

use crate::config::{AssistantConfig, PromptBudget};
use crate::llm_engine::provider::{
    GenerationOptions, GenerationRequest, LlmProvider, ModelError, ModelResponse, ProviderType,
};
use crate::llm_engine::providers::{OllamaConfig, OllamaProvider, SidecarConfig, SidecarProvider};

pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
    budget: PromptBudget,
    /// One generation at a time against the shared engine
    call_lock: Mutex<()>,
}

impl ModelGateway {
    /// Wrap an already initialized provider
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            options: GenerationOptions::default(),
            budget: PromptBudget::default(),
            call_lock: Mutex::new(()),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_budget(mut self, budget: PromptBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Build the configured provider and load its model.
    pub async fn connect(config: &AssistantConfig) -> Result<Self, ModelError> {
        let provider = build_provider(config)?;

        log::info!(
            "Loading model '{}' with {} provider",
            config.model_id,
            config.provider
        );
        let started = Instant::now();
        guarded(provider.initialize(&config.model_id)).await?;
        log::info!(
            "Model '{}' ready in {:.1}s",
            config.model_id,
            started.elapsed().as_secs_f32()
        );

        Ok(Self::new(provider)
            .with_options(config.generation)
            .with_budget(config.prompt_budget))
    }

    pub fn options(&self) -> GenerationOptions {
        self.options
    }

    pub fn budget(&self) -> PromptBudget {
        self.budget
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub async fn current_model(&self) -> Option<String> {
        self.provider.current_model().await
    }

    /// Generate with the gateway's default options.
    pub async fn generate(&self, prompt: &str) -> ModelResponse {
        self.generate_with(prompt, self.options).await
    }

    /// Run `prompt` against the engine and return the first continuation.
    ///
    /// Always returns a value: engine errors, empty output and panics all come
    /// back as `Err(ModelError)`.
    pub async fn generate_with(&self, prompt: &str, options: GenerationOptions) -> ModelResponse {
        if prompt.trim().is_empty() {
            return Err(ModelError::InvalidRequest("Prompt is empty".to_string()));
        }

        let request = GenerationRequest::new(prompt, options);

        let _turn = self.call_lock.lock().await;
        log::debug!(
            "Generating with {} ({} chars, max_length={}, do_sample={}, top_k={})",
            self.provider.provider_name(),
            prompt.len(),
            options.max_length,
            options.do_sample,
            options.top_k
        );
        let started = Instant::now();

        let result = guarded(self.provider.generate(request)).await;

        match result {
            Ok(response) if response.text.trim().is_empty() => {
                log::warn!("Model {} returned no text", response.model);
                Err(ModelError::EmptyOutput)
            }
            Ok(response) => {
                log::debug!(
                    "Generated {} chars in {}ms",
                    response.text.len(),
                    started.elapsed().as_millis()
                );
                Ok(response.text)
            }
            Err(e) => {
                log::error!("Generation failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn shutdown(&self) -> Result<(), ModelError> {
        guarded(self.provider.shutdown()).await
    }
}

/// Choose the backend named in the config. Does not load anything yet.
pub fn build_provider(config: &AssistantConfig) -> Result<Arc<dyn LlmProvider>, ModelError> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderType::Embedded => Arc::new(SidecarProvider::new(SidecarConfig {
            models_dir: config.models_dir.clone(),
            sidecar_path: config.sidecar_path.clone(),
            chat_template: config.chat_template.clone(),
        })),
        ProviderType::Ollama => Arc::new(OllamaProvider::new(OllamaConfig {
            base_url: config.ollama_url.clone(),
            timeout_secs: config.ollama_timeout_secs,
        })?),
    };
    Ok(provider)
}

/// Await a provider future, turning a panic into `ModelError::EnginePanic`.
async fn guarded<T, F>(future: F) -> Result<T, ModelError>
where
    F: Future<Output = Result<T, ModelError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("Generation engine panicked: {}", message);
            Err(ModelError::EnginePanic(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Holder for a gateway that is built on first use and then reused.
///
/// Racing callers wait for the same initialization. A failed initialization
/// leaves the cell empty so the next caller tries again.
pub struct GatewayCell {
    cell: OnceCell<Arc<ModelGateway>>,
}

impl GatewayCell {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<ModelGateway>, ModelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModelGateway, ModelError>>,
    {
        self.cell
            .get_or_try_init(move || async move { guarded(init()).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// The gateway, if it has been built
    pub fn get(&self) -> Option<Arc<ModelGateway>> {
        self.cell.get().cloned()
    }
}

impl Default for GatewayCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_engine::testing::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_generate_returns_text() {
        let mock = Arc::new(MockProvider::scripted(["Use public transport."]));
        let gateway = ModelGateway::new(mock.clone());

        let text = gateway.generate("Generate tips").await.unwrap();
        assert_eq!(text, "Use public transport.");
        assert_eq!(mock.prompts(), vec!["Generate tips".to_string()]);
    }

    #[tokio::test]
    async fn test_generate_passes_options() {
        let mock = Arc::new(MockProvider::echo());
        let options = GenerationOptions {
            max_length: 32,
            do_sample: false,
            top_k: 1,
        };
        let gateway = ModelGateway::new(mock.clone()).with_options(options);

        gateway.generate("hello").await.unwrap();
        assert_eq!(mock.requests()[0].options, options);
    }

    #[tokio::test]
    async fn test_engine_error_becomes_model_error() {
        let mock = Arc::new(MockProvider::failing(ModelError::InferenceFailed(
            "CUDA out of memory".to_string(),
        )));
        let gateway = ModelGateway::new(mock);

        let err = gateway.generate("Summarize").await.unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_engine_panic_is_caught() {
        let gateway = ModelGateway::new(Arc::new(MockProvider::panicking("tensor shape mismatch")));

        let err = gateway.generate("Summarize").await.unwrap_err();
        assert_eq!(err, ModelError::EnginePanic("tensor shape mismatch".to_string()));
        assert!(!err.to_string().is_empty());

        // The gateway stays usable after a panic
        let err = gateway.generate("again").await.unwrap_err();
        assert!(matches!(err, ModelError::EnginePanic(_)));
    }

    #[tokio::test]
    async fn test_empty_prompt_skips_engine() {
        let mock = Arc::new(MockProvider::echo());
        let gateway = ModelGateway::new(mock.clone());

        assert!(matches!(
            gateway.generate("").await,
            Err(ModelError::InvalidRequest(_))
        ));
        assert!(matches!(
            gateway.generate("  \n").await,
            Err(ModelError::InvalidRequest(_))
        ));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let gateway = ModelGateway::new(Arc::new(MockProvider::scripted(["   "])));
        assert_eq!(gateway.generate("prompt").await, Err(ModelError::EmptyOutput));
    }

    #[tokio::test]
    async fn test_large_and_odd_prompts() {
        let gateway = ModelGateway::new(Arc::new(MockProvider::echo()));

        let huge = "x".repeat(1_000_000);
        assert!(gateway.generate(&huge).await.is_ok());

        let odd = "\u{0}\u{1b}[31m\u{fffd}🏙️";
        assert!(gateway.generate(odd).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized() {
        let mock = Arc::new(MockProvider::echo());
        let gateway = Arc::new(ModelGateway::new(mock.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.generate(&format!("prompt {}", i)).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(mock.call_count(), 8);
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cell_initializes_once() {
        let cell = GatewayCell::new();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let gateway = cell
                .get_or_init(|| async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(ModelGateway::new(Arc::new(MockProvider::echo())))
                })
                .await
                .unwrap();
            assert_eq!(gateway.provider_name(), "mock");
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(cell.get().is_some());
    }

    #[tokio::test]
    async fn test_cell_racing_first_use() {
        let cell = Arc::new(GatewayCell::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                let builds = builds.clone();
                tokio::spawn(async move {
                    cell.get_or_init(|| async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(ModelGateway::new(Arc::new(MockProvider::echo())))
                    })
                    .await
                    .map(|_| ())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cell_failed_init_is_retried() {
        let cell = GatewayCell::new();

        let first = cell
            .get_or_init(|| async { Err(ModelError::ModelNotFound("gpt2".to_string())) })
            .await;
        assert!(first.is_err());
        assert!(cell.get().is_none());

        let second = cell
            .get_or_init(|| async { Ok(ModelGateway::new(Arc::new(MockProvider::echo()))) })
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_cell_init_panic_is_caught() {
        let cell = GatewayCell::new();
        let result = cell
            .get_or_init(|| async {
                let corrupt = true;
                if corrupt {
                    panic!("weights file truncated");
                }
                Ok(ModelGateway::new(Arc::new(MockProvider::echo())))
            })
            .await;
        assert!(matches!(result, Err(ModelError::EnginePanic(msg)) if msg.contains("truncated")));
    }

    #[test]
    fn test_build_provider_selects_backend() {
        let mut config = AssistantConfig::default();
        assert_eq!(build_provider(&config).unwrap().provider_name(), "embedded");

        config.provider = ProviderType::Ollama;
        assert_eq!(build_provider(&config).unwrap().provider_name(), "ollama");
    }
}
