//! Scripted providers for tests and credential-free runs.

use crate::api_types::{ChatMessage, StreamEvent};
use crate::llm::{ChatModel, CompletionParams};
use anyhow::Result;
use async_trait::async_trait;
use reveries_memory::{Embedder, Embedding};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Chat model that streams a fixed script.
///
/// With multiple replies, successive calls consume them in order, repeating
/// the last one once exhausted.
pub struct MockChatModel {
    replies: Vec<String>,
    next: Mutex<usize>,
}

impl MockChatModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            replies: vec![reply.into()],
            next: Mutex::new(0),
        }
    }

    pub fn scripted(replies: Vec<String>) -> Self {
        Self {
            replies,
            next: Mutex::new(0),
        }
    }

    fn next_reply(&self) -> String {
        let mut next = self.next.lock().unwrap();
        let reply = self
            .replies
            .get(*next)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_default();
        *next += 1;
        reply
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn stream(
        &self,
        _system: &str,
        _messages: Vec<ChatMessage>,
        _params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let reply = self.next_reply();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            // Word-sized chunks so consumers exercise their token paths.
            for word in split_into_chunks(&reply) {
                if tx.send(StreamEvent::TextDelta(word)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
        });
        Ok(rx)
    }

    async fn complete(
        &self,
        _system: &str,
        _messages: Vec<ChatMessage>,
        _params: CompletionParams,
    ) -> Result<String> {
        Ok(self.next_reply())
    }
}

fn split_into_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() && !current.trim().is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Deterministic embedder: the same text always maps to the same unit
/// vector, distinct texts almost always to distinct directions.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 8 }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            let slot = (i + byte as usize) % self.dimensions;
            vector[slot] += (byte % 13) as f32 + 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
