//! Chat session state
//!
//! The transcript lives in an explicit `ChatSession` owned by whatever drives
//! one user session, and is dropped with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm_engine::{display_text, ModelGateway, ModelResponse};
use crate::templates;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only, in production order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
}

impl ChatTranscript {
    fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
            created_at: Utc::now(),
        });
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// `(role, content)` pairs, oldest first
    pub fn turns(&self) -> impl Iterator<Item = (ChatRole, &str)> {
        self.messages.iter().map(|m| (m.role, m.content.as_str()))
    }
}

#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    transcript: ChatTranscript,
}

impl ChatSession {
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        log::debug!("Chat session {} started", id);
        Self {
            id,
            started_at: Utc::now(),
            transcript: ChatTranscript::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn transcript(&self) -> &ChatTranscript {
        &self.transcript
    }

    /// Ask the model about `utterance` and record both sides of the turn.
    ///
    /// Blank input records nothing and returns `None` without a model call.
    /// A failed generation is recorded as the assistant's reply, marked as an
    /// error, so the transcript keeps its user/assistant alternation.
    pub async fn send(&mut self, gateway: &ModelGateway, utterance: &str) -> Option<ModelResponse> {
        if utterance.trim().is_empty() {
            return None;
        }

        self.transcript.push(ChatRole::User, utterance);

        let response = match gateway.budget().fit(utterance) {
            Ok(content) => gateway.generate(&templates::chat_turn(&content)).await,
            Err(e) => Err(e),
        };

        self.transcript.push(ChatRole::Assistant, display_text(&response));
        log::debug!(
            "Chat session {}: {} messages",
            self.id,
            self.transcript.len()
        );

        Some(response)
    }

    /// Record a turn whose reply was produced elsewhere (e.g. the shell could
    /// not reach the model at all).
    pub fn record_failed_turn(&mut self, utterance: &str, response: &ModelResponse) {
        self.transcript.push(ChatRole::User, utterance);
        self.transcript.push(ChatRole::Assistant, display_text(response));
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OverflowPolicy, PromptBudget};
    use crate::llm_engine::testing::MockProvider;
    use crate::llm_engine::{ModelError, ERROR_MARKER};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_transcript_order() {
        let mock = Arc::new(MockProvider::scripted(["R1", "R2"]));
        let gateway = ModelGateway::new(mock.clone());
        let mut session = ChatSession::new();

        session.send(&gateway, "U1").await;
        session.send(&gateway, "U2").await;

        let turns: Vec<_> = session.transcript().turns().collect();
        assert_eq!(
            turns,
            vec![
                (ChatRole::User, "U1"),
                (ChatRole::Assistant, "R1"),
                (ChatRole::User, "U2"),
                (ChatRole::Assistant, "R2"),
            ]
        );
        assert_eq!(
            mock.prompts(),
            vec!["User: U1\nAssistant:".to_string(), "User: U2\nAssistant:".to_string()]
        );
    }

    #[tokio::test]
    async fn test_blank_utterance_is_ignored() {
        let mock = Arc::new(MockProvider::echo());
        let gateway = ModelGateway::new(mock.clone());
        let mut session = ChatSession::new();

        assert!(session.send(&gateway, "   ").await.is_none());
        assert!(session.transcript().is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_recorded_as_reply() {
        let gateway = ModelGateway::new(Arc::new(MockProvider::failing(
            ModelError::InferenceFailed("engine offline".to_string()),
        )));
        let mut session = ChatSession::new();

        let response = session.send(&gateway, "Hello").await.unwrap();
        assert!(response.is_err());

        let messages = session.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert!(messages[1].content.starts_with(ERROR_MARKER));
        assert!(messages[1].content.contains("engine offline"));
    }

    #[tokio::test]
    async fn test_rejected_by_budget_skips_model() {
        let mock = Arc::new(MockProvider::echo());
        let gateway = ModelGateway::new(mock.clone()).with_budget(PromptBudget {
            max_content_chars: 5,
            overflow: OverflowPolicy::Reject,
        });
        let mut session = ChatSession::new();

        let response = session.send(&gateway, "far too long").await.unwrap();
        assert!(matches!(response, Err(ModelError::PromptRejected { .. })));
        assert_eq!(mock.call_count(), 0);
        assert_eq!(session.transcript().len(), 2);
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut first = ChatSession::new();
        let second = ChatSession::new();
        assert_ne!(first.id(), second.id());

        first.record_failed_turn("hi", &Err(ModelError::NotInitialized));
        assert_eq!(first.transcript().len(), 2);
        assert!(second.transcript().is_empty());
    }
}
