//! In-process stand-in for a generation backend, used by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm_engine::provider::{
    GenerationRequest, GenerationResponse, LlmProvider, ModelError, ProviderCapabilities,
};

enum Behavior {
    /// Answer with `echo: <prompt>`
    Echo,
    /// Pop canned answers in order, then fall back to echo
    Scripted(Mutex<VecDeque<String>>),
    Fail(ModelError),
    Panic(&'static str),
}

pub struct MockProvider {
    behavior: Behavior,
    requests: Mutex<Vec<GenerationRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::with_behavior(Behavior::Echo)
    }

    pub fn scripted<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = answers.into_iter().map(Into::into).collect();
        Self::with_behavior(Behavior::Scripted(Mutex::new(queue)))
    }

    pub fn failing(error: ModelError) -> Self {
        Self::with_behavior(Behavior::Fail(error))
    }

    pub fn panicking(message: &'static str) -> Self {
        Self::with_behavior(Behavior::Panic(message))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            embedded: true,
            top_k_sampling: true,
            deterministic: true,
        }
    }

    async fn initialize(&self, _model_id: &str) -> Result<(), ModelError> {
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn current_model(&self) -> Option<String> {
        Some("mock".to_string())
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, ModelError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        // Give other callers a chance to overlap if nothing serializes them
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = match &self.behavior {
            Behavior::Echo => format!("echo: {}", request.prompt),
            Behavior::Scripted(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| format!("echo: {}", request.prompt)),
            Behavior::Fail(error) => return Err(error.clone()),
            Behavior::Panic(message) => panic!("{}", message),
        };

        Ok(GenerationResponse {
            text,
            model: "mock".to_string(),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    async fn shutdown(&self) -> Result<(), ModelError> {
        Ok(())
    }
}
