//! Voyage AI embedding provider.

use crate::retry::{with_retry, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reveries_memory::{Embedder, Embedding};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct VoyageEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl VoyageEmbedder {
    pub fn new(model: &str, timeout_secs: u64) -> Result<Self> {
        let api_key = env::var("VOYAGE_API_KEY").unwrap_or_else(|_| "mock".to_string());
        let base_url = env::var("VOYAGE_BASE_URL")
            .unwrap_or_else(|_| "https://api.voyageai.com/v1".to_string())
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
impl Embedder for VoyageEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let url = format!("{}/embeddings", self.base_url);
        let payload = json!({
            "model": self.model,
            "input": [text],
            "input_type": "document",
        });

        let response = with_retry(&RetryConfig::default(), "Voyage", || async {
            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&payload)
                .send()
                .await
                .context("Failed to send embedding request to Voyage")?;
            Ok(resp)
        })
        .await?;

        let resp_json: Value = response
            .json()
            .await
            .context("Failed to parse Voyage embedding response")?;
        super::openai::parse_embedding_response(&resp_json, "Voyage")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_defaults() {
        let embedder = VoyageEmbedder::new("voyage-3-lite", 30).unwrap();
        assert_eq!(embedder.model, "voyage-3-lite");
        assert!(embedder.base_url.contains("voyageai.com"));
    }
}
