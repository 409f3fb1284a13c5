//! Cerebras LLM provider.
//!
//! Cerebras exposes an OpenAI-compatible API, so the wire helpers are
//! shared with the OpenAI provider. This is the default chat and monologue
//! backend: fast token streaming suits a loop that inspects every token.

use crate::api_types::{ChatMessage, StreamEvent};
use crate::llm::{ChatModel, CompletionParams};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct CerebrasClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl CerebrasClient {
    pub fn new(model: &str, timeout_secs: u64) -> Result<Self> {
        let api_key = env::var("CEREBRAS_API_KEY").unwrap_or_else(|_| "mock".to_string());
        let base_url = env::var("CEREBRAS_BASE_URL")
            .unwrap_or_else(|_| "https://api.cerebras.ai/v1".to_string())
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
impl ChatModel for CerebrasClient {
    async fn stream(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        super::openai::stream_chat_completion(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.model,
            system,
            messages,
            params,
            "Cerebras",
        )
        .await
    }

    async fn complete(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<String> {
        super::openai::complete_chat(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.model,
            system,
            messages,
            params,
            "Cerebras",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let client = CerebrasClient::new("llama-3.3-70b", 30).unwrap();
        assert_eq!(client.model, "llama-3.3-70b");
        assert!(client.base_url.contains("cerebras.ai"));
    }
}
