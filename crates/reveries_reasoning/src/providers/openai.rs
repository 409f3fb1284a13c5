//! OpenAI provider: chat completions (streaming and not) plus embeddings.
//!
//! The chat-completions wire format is shared with every OpenAI-compatible
//! endpoint; the Cerebras provider reuses the helpers here.

use crate::api_types::{ChatMessage, StreamEvent};
use crate::llm::{ChatModel, CompletionParams};
use crate::retry::{with_retry, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reveries_memory::{Embedder, Embedding};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(model: &str, timeout_secs: u64) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| "mock".to_string());
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()?,
            api_key,
            base_url,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn stream(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        stream_chat_completion(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.model,
            system,
            messages,
            params,
            "OpenAI",
        )
        .await
    }

    async fn complete(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<String> {
        complete_chat(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.model,
            system,
            messages,
            params,
            "OpenAI",
        )
        .await
    }
}

// ============================================================================
// Shared OpenAI-compatible helpers
// ============================================================================

pub(crate) fn build_chat_payload(
    model: &str,
    system: &str,
    messages: &[ChatMessage],
    params: CompletionParams,
    stream: bool,
) -> Value {
    let mut wire = vec![json!({"role": "system", "content": system})];
    for msg in messages {
        wire.push(json!({"role": msg.role.as_str(), "content": msg.content}));
    }
    json!({
        "model": model,
        "messages": wire,
        "max_tokens": params.max_tokens,
        "temperature": params.temperature,
        "stream": stream,
    })
}

/// Non-streaming completion against any OpenAI-compatible endpoint.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn complete_chat(
    client: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    system: &str,
    messages: Vec<ChatMessage>,
    params: CompletionParams,
    provider: &str,
) -> Result<String> {
    let payload = build_chat_payload(model, system, &messages, params, false);
    let url = format!("{}/chat/completions", base_url);

    let response = with_retry(&RetryConfig::default(), provider, || async {
        let resp = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", provider))?;
        Ok(resp)
    })
    .await?;

    let resp_json: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", provider))?;
    parse_chat_response(&resp_json, provider)
}

pub(crate) fn parse_chat_response(resp_json: &Value, provider: &str) -> Result<String> {
    resp_json["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("{} reply had no message content", provider))
}

/// Streaming completion against any OpenAI-compatible endpoint.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn stream_chat_completion(
    client: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    system: &str,
    messages: Vec<ChatMessage>,
    params: CompletionParams,
    provider: &str,
) -> Result<mpsc::Receiver<StreamEvent>> {
    let payload = build_chat_payload(model, system, &messages, params, true);
    let url = format!("{}/chat/completions", base_url);

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .json(&payload)
        .send()
        .await
        .with_context(|| format!("Failed to send streaming request to {}", provider))?;

    if !response.status().is_success() {
        let status = response.status();
        let err_text = response.text().await.unwrap_or_default();
        anyhow::bail!("{} streaming error {}: {}", provider, status, err_text);
    }

    let (tx, rx) = mpsc::channel(64);
    let byte_stream = response.bytes_stream();

    tokio::spawn(async move {
        if let Err(e) = parse_chat_sse(byte_stream, &tx).await {
            let _ = tx.send(StreamEvent::Error(e.to_string())).await;
        }
    });

    Ok(rx)
}

/// Parse an OpenAI-compatible SSE byte stream into StreamEvents.
///
/// Lines look like `data: {json}`; the stream ends with `data: [DONE]`.
pub(crate) async fn parse_chat_sse<S>(
    byte_stream: S,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<()>
where
    S: futures_util::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>>
        + Unpin
        + Send,
{
    use super::sse::SseBuffer;

    let mut stream = byte_stream;
    let mut buf = SseBuffer::new();

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.context("Error reading SSE chunk")?;
        buf.push_bytes(&chunk);

        for line in buf.extract_lines() {
            if let Some(done) = handle_sse_line(&line, tx).await {
                if done {
                    return Ok(());
                }
            }
        }
    }

    // The final line may lack its trailing newline.
    let residue = buf.residue().trim().to_string();
    if !residue.is_empty() {
        if let Some(true) = handle_sse_line(&residue, tx).await {
            return Ok(());
        }
    }

    // Stream ended without [DONE]; report completion anyway.
    let _ = tx.send(StreamEvent::Done).await;
    Ok(())
}

/// Returns Some(true) when the stream is finished, Some(false) after a
/// delivered delta, None for ignorable lines.
async fn handle_sse_line(line: &str, tx: &mpsc::Sender<StreamEvent>) -> Option<bool> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let data = data.trim();
    if data == "[DONE]" {
        let _ = tx.send(StreamEvent::Done).await;
        return Some(true);
    }
    let value: Value = serde_json::from_str(data).ok()?;
    let delta = value["choices"][0]["delta"]["content"].as_str()?;
    if delta.is_empty() {
        return None;
    }
    let _ = tx.send(StreamEvent::TextDelta(delta.to_string())).await;
    Some(false)
}

// ============================================================================
// Embeddings
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(model: &str, timeout_secs: u64) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| "mock".to_string());
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()?,
            api_key,
            base_url,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let url = format!("{}/embeddings", self.base_url);
        let payload = json!({"model": self.model, "input": [text]});

        let response = with_retry(&RetryConfig::default(), "OpenAI embeddings", || async {
            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&payload)
                .send()
                .await
                .context("Failed to send embedding request to OpenAI")?;
            Ok(resp)
        })
        .await?;

        let resp_json: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI embedding response")?;
        parse_embedding_response(&resp_json, "OpenAI")
    }
}

pub(crate) fn parse_embedding_response(resp_json: &Value, provider: &str) -> Result<Embedding> {
    resp_json["data"][0]["embedding"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
        .ok_or_else(|| anyhow::anyhow!("{} embedding reply had no vector", provider))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_types::Role;

    fn fake_stream(
        data: &str,
    ) -> impl futures_util::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>>
           + Unpin
           + Send {
        futures_util::stream::iter(vec![Ok(bytes::Bytes::from(data.to_string()))])
    }

    #[test]
    fn test_build_payload_roles() {
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let payload = build_chat_payload(
            "m",
            "be kind",
            &messages,
            CompletionParams::default(),
            true,
        );
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(payload["messages"][2]["role"], "assistant");
        assert_eq!(payload["stream"], true);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_parse_chat_response() {
        let resp = json!({"choices": [{"message": {"content": "Hello!"}}]});
        assert_eq!(parse_chat_response(&resp, "test").unwrap(), "Hello!");

        let bad = json!({"choices": []});
        assert!(parse_chat_response(&bad, "test").is_err());
    }

    #[test]
    fn test_parse_embedding_response() {
        let resp = json!({"data": [{"embedding": [0.1, 0.2]}]});
        let emb = parse_embedding_response(&resp, "test").unwrap();
        assert_eq!(emb, vec![0.1, 0.2]);

        let bad = json!({"data": []});
        assert!(parse_embedding_response(&bad, "test").is_err());
    }

    #[tokio::test]
    async fn test_sse_deltas_and_done() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\
                   data: [DONE]\n";
        let (tx, mut rx) = mpsc::channel(32);
        parse_chat_sse(fake_stream(sse), &tx).await.unwrap();
        drop(tx);

        let mut texts = Vec::new();
        let mut done = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                StreamEvent::TextDelta(t) => texts.push(t),
                StreamEvent::Done => done = true,
                StreamEvent::Error(_) => panic!("unexpected error"),
            }
        }
        assert!(done);
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_sse_residue_without_trailing_newline() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}";
        let (tx, mut rx) = mpsc::channel(32);
        parse_chat_sse(fake_stream(sse), &tx).await.unwrap();
        drop(tx);

        let mut texts = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let StreamEvent::TextDelta(t) = ev {
                texts.push(t);
            }
        }
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_sse_ignores_keepalive_lines() {
        let sse = ": keepalive\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\ndata: [DONE]\n";
        let (tx, mut rx) = mpsc::channel(32);
        parse_chat_sse(fake_stream(sse), &tx).await.unwrap();
        drop(tx);

        let mut texts = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let StreamEvent::TextDelta(t) = ev {
                texts.push(t);
            }
        }
        assert_eq!(texts, vec!["x"]);
    }
}
