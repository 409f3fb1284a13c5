use crate::api_types::{ChatMessage, StreamEvent};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.8,
        }
    }
}

/// A chat-completion model. Streaming is the primary contract; `complete`
/// exists for the non-streaming abstraction call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Stream a completion token by token. Errors during the stream arrive
    /// as `StreamEvent::Error`; errors establishing it surface directly.
    async fn stream(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>>;

    /// One-shot completion, returning the full reply text.
    async fn complete(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<String>;
}
