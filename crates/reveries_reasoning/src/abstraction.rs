//! Consolidation abstraction: prompt construction and lenient reply parsing.
//!
//! The prompt demands past-tense summaries so situational details ("at an
//! airport") stay recorded as events instead of leaking into current state
//! at retrieval time. Swapping the backend must preserve that contract.

use crate::api_types::ChatMessage;
use crate::llm::{ChatModel, CompletionParams};
use anyhow::Result;
use async_trait::async_trait;
use reveries_core::RawExperience;
use reveries_memory::{AbstractionReply, Abstractor, EpisodeCandidate, SelfModelUpdates};
use std::sync::Arc;

const ABSTRACTION_SYSTEM: &str = "You distill raw experiences into durable episodic memories. \
Reply with JSON only, no commentary.";

/// Build the abstraction prompt for one consolidation pass.
pub fn build_abstraction_prompt(experiences: &[RawExperience], narrative: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Below are recent raw experiences. Abstract them into episodic memories.\n\n\
         Rules:\n\
         - Write every summary in PAST TENSE, describing events that happened. \
           Never describe current state; \"they were at an airport\" must stay an event, \
           not a standing fact.\n\
         - Group related experiences into one episode where they clearly belong together.\n\
         - Keep one or two verbatim quotes per episode as exemplars.\n\
         - salience and confidence are between 0 and 1.\n\n",
    );

    if !narrative.trim().is_empty() {
        prompt.push_str("Current self-narrative:\n");
        prompt.push_str(narrative);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Experiences:\n");
    for (i, exp) in experiences.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. [{}] {}\n",
            i + 1,
            exp.kind.as_str(),
            exp.content
        ));
    }

    prompt.push_str(
        "\nReply with JSON of this exact shape:\n\
         {\"episodes\": [{\"summary\": \"...\", \"topics\": [\"...\"], \"salience\": 0.5, \
         \"confidence\": 0.5, \"exemplars\": [{\"quote\": \"...\", \"significance\": \"...\"}], \
         \"patterns\": [\"...\"]}], \
         \"self_model_updates\": {\"current_focus\": null, \"new_tendency\": null, \
         \"new_value\": null, \"narrative_update\": null}}\n",
    );
    prompt
}

/// Parse the abstraction model's reply, tolerating the usual damage.
///
/// Strategy: direct parse; then strip Markdown code fences and parse once
/// more; on second failure, an empty reply. Individual malformed episode
/// entries are skipped so the rest of the batch survives.
pub fn parse_abstraction_reply(text: &str) -> AbstractionReply {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return AbstractionReply::default();
    }

    if let Some(reply) = parse_attempt(trimmed) {
        return reply;
    }

    let unfenced = strip_code_fences(trimmed);
    if let Some(reply) = parse_attempt(&unfenced) {
        return reply;
    }

    tracing::warn!(
        "Could not parse abstraction reply (first 200 chars): {}",
        &trimmed[..trimmed.len().min(200)]
    );
    AbstractionReply::default()
}

fn parse_attempt(text: &str) -> Option<AbstractionReply> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    let mut episodes = Vec::new();
    if let Some(entries) = value.get("episodes").and_then(|e| e.as_array()) {
        for entry in entries {
            match serde_json::from_value::<EpisodeCandidate>(entry.clone()) {
                Ok(candidate) if !candidate.summary.trim().is_empty() => {
                    episodes.push(candidate);
                }
                Ok(_) => tracing::warn!("Skipping episode entry with empty summary"),
                Err(e) => tracing::warn!("Skipping malformed episode entry: {}", e),
            }
        }
    }

    let self_model_updates = value
        .get("self_model_updates")
        .and_then(|u| serde_json::from_value::<SelfModelUpdates>(u.clone()).ok())
        .unwrap_or_default();

    Some(AbstractionReply {
        episodes,
        self_model_updates,
    })
}

/// Strip surrounding Markdown code fences (``` or ```json).
fn strip_code_fences(text: &str) -> String {
    let re = regex::Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?\s*```").unwrap();
    match re.captures(text) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
        None => text.to_string(),
    }
}

/// Abstraction backed by a chat model's non-streaming completion.
pub struct LlmAbstractor {
    model: Arc<dyn ChatModel>,
    params: CompletionParams,
}

impl LlmAbstractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            params: CompletionParams {
                max_tokens: 2048,
                temperature: 0.3,
            },
        }
    }
}

#[async_trait]
impl Abstractor for LlmAbstractor {
    async fn abstract_experiences(
        &self,
        experiences: &[RawExperience],
        narrative: &str,
    ) -> Result<AbstractionReply> {
        let prompt = build_abstraction_prompt(experiences, narrative);
        let reply = self
            .model
            .complete(ABSTRACTION_SYSTEM, vec![ChatMessage::user(prompt)], self.params)
            .await?;
        Ok(parse_abstraction_reply(&reply))
    }
}
