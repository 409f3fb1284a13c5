//! Turns text into a raw experience: embed, score initial salience, store.

use crate::embedding::Embedder;
use crate::store::SqliteStore;
use anyhow::{Context, Result};
use reveries_core::{ExperienceKind, ExperienceMetadata, RawExperience};

/// Heuristic starting importance for a fresh experience.
///
/// Base 0.3, raised by length tiers and by question/exclamation density,
/// capped at 1.0.
pub fn initial_salience(text: &str) -> f32 {
    let words = text.split_whitespace().count();
    let questions = text.matches('?').count() as f32;
    let exclamations = text.matches('!').count() as f32;

    let mut salience = 0.3;
    if words > 10 {
        salience += 0.1;
    }
    if words > 50 {
        salience += 0.1;
    }
    if words > 100 {
        salience += 0.1;
    }
    salience += (questions * 0.05).min(0.15);
    salience += (exclamations * 0.03).min(0.1);
    salience.min(1.0)
}

/// Encode `text` as a raw experience and append it to the store.
///
/// Embedding failures propagate to the caller; the encoder never swallows
/// them.
pub async fn encode(
    store: &SqliteStore,
    embedder: &dyn Embedder,
    text: &str,
    kind: ExperienceKind,
    metadata: ExperienceMetadata,
) -> Result<RawExperience> {
    let embedding = embedder
        .embed(text)
        .await
        .context("Failed to embed experience")?;
    let exp = RawExperience::new(
        kind,
        chrono::Utc::now().timestamp(),
        text.to_string(),
        embedding,
        initial_salience(text),
        metadata,
    );
    store.insert_raw(&exp).await?;
    tracing::debug!(
        "Encoded {} experience {} (salience {:.2})",
        kind.as_str(),
        exp.id,
        exp.salience
    );
    Ok(exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            anyhow::bail!("embedding service unavailable")
        }
    }

    #[test]
    fn test_salience_base() {
        assert!((initial_salience("short text") - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_salience_length_tiers() {
        let eleven = "word ".repeat(11);
        assert!((initial_salience(&eleven) - 0.4).abs() < 1e-6);
        let sixty = "word ".repeat(60);
        assert!((initial_salience(&sixty) - 0.5).abs() < 1e-6);
        let hundred_ten = "word ".repeat(110);
        assert!((initial_salience(&hundred_ten) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_salience_punctuation_caps() {
        // 5 questions cap at +0.15, 10 exclamations cap at +0.1
        let text = "a????? b!!!!!!!!!!";
        assert!((initial_salience(text) - (0.3 + 0.15 + 0.1)).abs() < 1e-6);
    }

    #[test]
    fn test_salience_never_exceeds_one() {
        let text = format!("{} ?????? !!!!!!", "word ".repeat(200));
        assert!(initial_salience(&text) <= 1.0);
    }

    #[tokio::test]
    async fn test_encode_writes_unprocessed_row() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let exp = encode(
            &store,
            &FixedEmbedder,
            "I planted tomatoes today!",
            ExperienceKind::Conversation,
            ExperienceMetadata::default(),
        )
        .await
        .unwrap();

        assert!(!exp.processed);
        let pending = store.unprocessed_raw().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, exp.id);
        assert_eq!(pending[0].embedding, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_embed_failure_propagates() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let result = encode(
            &store,
            &FailingEmbedder,
            "text",
            ExperienceKind::External,
            ExperienceMetadata::default(),
        )
        .await;
        assert!(result.is_err());
        assert!(store.unprocessed_raw().await.unwrap().is_empty());
    }
}
