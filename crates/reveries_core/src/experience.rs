use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a raw experience came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceKind {
    /// One user/assistant exchange.
    Conversation,
    /// One inner-monologue cycle.
    Monologue,
    /// A fragment from outside the conversation loop.
    External,
}

impl ExperienceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceKind::Conversation => "conversation",
            ExperienceKind::Monologue => "monologue",
            ExperienceKind::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(ExperienceKind::Conversation),
            "monologue" => Some(ExperienceKind::Monologue),
            "external" => Some(ExperienceKind::External),
            _ => None,
        }
    }
}

/// Loose metadata attached to a raw experience.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceMetadata {
    pub conversation_id: Option<String>,
    pub turn_count: Option<u32>,
    pub topics: Vec<String>,
    pub unresolved_tensions: Vec<String>,
}

/// Short-term record of something that happened, pending consolidation.
///
/// Born from the encoder, consumed (flagged `processed`) by the
/// consolidation engine. Never mutated otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExperience {
    pub id: String,
    pub kind: ExperienceKind,
    /// Unix seconds.
    pub timestamp: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    /// Initial importance in [0, 1].
    pub salience: f32,
    pub processed: bool,
    pub metadata: ExperienceMetadata,
}

impl RawExperience {
    pub fn new(
        kind: ExperienceKind,
        timestamp: i64,
        content: String,
        embedding: Vec<f32>,
        salience: f32,
        metadata: ExperienceMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp,
            content,
            embedding,
            salience: salience.clamp(0.0, 1.0),
            processed: false,
            metadata,
        }
    }
}
