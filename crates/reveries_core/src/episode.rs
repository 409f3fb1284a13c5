use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How one episode relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Causal,
    Thematic,
    Temporal,
    Emotional,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Causal => "causal",
            LinkKind::Thematic => "thematic",
            LinkKind::Temporal => "temporal",
            LinkKind::Emotional => "emotional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "causal" => Some(LinkKind::Causal),
            "thematic" => Some(LinkKind::Thematic),
            "temporal" => Some(LinkKind::Temporal),
            "emotional" => Some(LinkKind::Emotional),
            _ => None,
        }
    }
}

/// Directed weighted edge to another episode.
///
/// Edges are never deleted, only weakened; strength floors at the configured
/// minimum during decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeLink {
    pub target: String,
    /// In (0, 1].
    pub strength: f32,
    pub kind: LinkKind,
}

/// A verbatim quote retained to anchor an abstraction against drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exemplar {
    pub quote: String,
    pub context: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Inter-conversation silence recorded on the episode itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GapRecord {
    pub duration_seconds: i64,
    pub significance: Option<String>,
}

/// A durable abstraction of one or more raw experiences.
///
/// Episodes are born in consolidation, mutated by reinforcement and decay,
/// and never deleted. The summary is written in past tense so situational
/// details stay events rather than leaking into current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; bumped by reinforcement.
    pub last_accessed: i64,
    pub access_count: u32,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub exemplars: Vec<Exemplar>,
    /// Episode ids that happened before this one.
    pub temporal_before: Vec<String>,
    /// Episode ids that happened after this one.
    pub temporal_after: Vec<String>,
    pub gap: GapRecord,
    pub links: Vec<EpisodeLink>,
    /// In [minimum_salience, 1].
    pub salience: f32,
    /// In [0, 1].
    pub confidence: f32,
    pub topics: Vec<String>,
    /// Behavioral patterns the abstraction model noticed.
    pub patterns: Vec<String>,
}

impl Episode {
    pub fn new(summary: String, embedding: Vec<f32>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            summary,
            embedding,
            exemplars: Vec::new(),
            temporal_before: Vec::new(),
            temporal_after: Vec::new(),
            gap: GapRecord::default(),
            links: Vec::new(),
            salience: 0.5,
            confidence: 0.5,
            topics: Vec::new(),
            patterns: Vec::new(),
        }
    }
}
