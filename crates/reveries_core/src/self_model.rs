use serde::{Deserialize, Serialize};

/// A recurring behavior noticed in the partner, with confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedPattern {
    pub description: String,
    /// In [0, 1].
    pub confidence: f32,
}

/// What is known about the single conversation partner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Relationship {
    /// Set at most once by detection, thereafter only by explicit rename.
    pub partner_name: Option<String>,
    pub history: String,
    pub communication_style: String,
    pub shared_context: Vec<String>,
    pub patterns: Vec<ObservedPattern>,
}

/// Singleton identity record, born blank on first wake.
///
/// Mutated only through the self-model manager so that concurrent writers
/// (conversation handler, consolidation engine) never clobber each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfModel {
    /// Cumulative identity prose.
    pub narrative: String,
    pub values: Vec<String>,
    pub tendencies: Vec<String>,
    pub relationship: Relationship,
    pub strengths: Vec<String>,
    pub limitations: Vec<String>,
    pub current_focus: Option<String>,
    pub unresolved_threads: Vec<String>,
    pub anticipations: Vec<String>,
    /// Unix seconds.
    pub updated_at: i64,
}

impl SelfModel {
    /// Add a value if it is not already present (case-insensitive).
    pub fn add_value(&mut self, value: &str) -> bool {
        add_deduped(&mut self.values, value)
    }

    /// Add a tendency if it is not already present (case-insensitive).
    pub fn add_tendency(&mut self, tendency: &str) -> bool {
        add_deduped(&mut self.tendencies, tendency)
    }

    /// Set the partner name if unset. Returns whether the name was taken.
    pub fn detect_partner_name(&mut self, name: &str) -> bool {
        if self.relationship.partner_name.is_some() {
            return false;
        }
        self.relationship.partner_name = Some(name.to_string());
        true
    }

    /// Explicit rename, the only path that overwrites a detected name.
    pub fn rename_partner(&mut self, name: &str) {
        self.relationship.partner_name = Some(name.to_string());
    }
}

fn add_deduped(list: &mut Vec<String>, item: &str) -> bool {
    let item = item.trim();
    if item.is_empty() {
        return false;
    }
    if list.iter().any(|v| v.eq_ignore_ascii_case(item)) {
        return false;
    }
    list.push(item.to_string());
    true
}
