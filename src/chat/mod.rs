//! Chat assistant: one transcript per interactive session

pub mod session;

pub use session::{ChatMessage, ChatRole, ChatSession, ChatTranscript};
