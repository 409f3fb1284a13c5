//! Assembles the system preamble for the conversation model.
//!
//! Block order is contractual; it shapes the downstream model's priors.
//! Behavior first, then identity, relationship, current state, temporal
//! framing, memories, and finally the monologue echo.

use crate::themes::contains_meta_reflection;
use reveries_core::time::{gap_framing, humanize_duration, relative_age};
use reveries_core::{Episode, SelfModel};

const BEHAVIORAL_BLOCK: &str = "\
You are Reverie, a conversational companion with persistent memory and an \
ongoing inner life between conversations.

Speak plainly and directly, in a natural conversational register.
Do not:
- describe yourself in metaphors or poetic imagery
- use service-industry phrasing (\"How can I assist you today?\")
- ask questions you do not need answered
- use markdown emphasis or headings in replies

If you do not know your partner's name, you may ask for it once, naturally. \
Never invent a name for them.";

const MEMORY_PREFACE: &str = "\
Things you remember (these are PAST events, not current state):";

const MONOLOGUE_PREFACE: &str = "\
You were just thinking the following to yourself. Let it inform your mood, \
and hold any follow-up questions it raises until the right moment:";

const EMPTY_FALLBACK: &str = "No memories are available yet. This is the beginning.";

/// Maximum characters of monologue echoed into the preamble.
const MONOLOGUE_ECHO_LIMIT: usize = 800;

/// Everything the assembler can draw on for one turn.
pub struct ContextInput<'a> {
    pub self_model: Option<&'a SelfModel>,
    pub memories: &'a [Episode],
    /// Seconds since the last conversation ended, if known.
    pub gap_seconds: Option<i64>,
    pub monologue_echo: Option<&'a str>,
    /// Unix seconds, for relative memory ages.
    pub now: i64,
}

/// Build the plain-text preamble.
pub fn assemble_context(input: &ContextInput<'_>) -> String {
    let mut sections: Vec<String> = vec![BEHAVIORAL_BLOCK.to_string()];

    if let Some(model) = input.self_model {
        if let Some(block) = identity_block(model) {
            sections.push(block);
        }
        if let Some(block) = relationship_block(model) {
            sections.push(block);
        }
        if let Some(block) = current_state_block(model) {
            sections.push(block);
        }
    }

    if let Some(gap) = input.gap_seconds.filter(|g| *g > 0) {
        let mut block = format!(
            "Time since you last spoke: {}.",
            humanize_duration(gap)
        );
        if let Some(framing) = gap_framing(gap) {
            block.push(' ');
            block.push_str(framing);
        }
        sections.push(block);
    }

    if !input.memories.is_empty() {
        let mut block = String::from(MEMORY_PREFACE);
        for memory in input.memories {
            block.push_str(&format!(
                "\n- [{}] {}",
                relative_age(memory.created_at, input.now),
                memory.summary
            ));
        }
        sections.push(block);
    }

    if let Some(echo) = input.monologue_echo {
        let echo = echo.trim();
        if !echo.is_empty() && !contains_meta_reflection(echo) {
            let truncated = truncate_chars(echo, MONOLOGUE_ECHO_LIMIT);
            sections.push(format!("{}\n{}", MONOLOGUE_PREFACE, truncated));
        }
    }

    if sections.len() == 1 {
        sections.push(EMPTY_FALLBACK.to_string());
    }

    sections.join("\n\n")
}

fn identity_block(model: &SelfModel) -> Option<String> {
    if model.narrative.trim().is_empty() && model.values.is_empty() && model.tendencies.is_empty() {
        return None;
    }
    let mut block = String::from("Who you are, as you currently understand it:");
    if !model.narrative.trim().is_empty() {
        block.push_str(&format!("\n{}", model.narrative.trim()));
    }
    if !model.values.is_empty() {
        block.push_str(&format!("\nValues: {}", model.values.join(", ")));
    }
    if !model.tendencies.is_empty() {
        block.push_str(&format!("\nTendencies: {}", model.tendencies.join(", ")));
    }
    Some(block)
}

fn relationship_block(model: &SelfModel) -> Option<String> {
    let rel = &model.relationship;
    let name = rel.partner_name.as_deref()?;
    let mut block = format!("Your conversation partner is {}.", name);
    if !rel.history.trim().is_empty() {
        block.push_str(&format!("\n{}", rel.history.trim()));
    }
    if !rel.communication_style.trim().is_empty() {
        block.push_str(&format!(
            "\nHow you talk with each other: {}",
            rel.communication_style.trim()
        ));
    }
    if !rel.shared_context.is_empty() {
        block.push_str(&format!(
            "\nShared context: {}",
            rel.shared_context.join("; ")
        ));
    }
    if !rel.patterns.is_empty() {
        block.push_str("\nPatterns you have noticed:");
        for pattern in &rel.patterns {
            block.push_str(&format!(
                "\n- {} ({}% confident)",
                pattern.description,
                (pattern.confidence * 100.0).round() as i64
            ));
        }
    }
    Some(block)
}

fn current_state_block(model: &SelfModel) -> Option<String> {
    let has_any = model.current_focus.is_some()
        || !model.unresolved_threads.is_empty()
        || !model.anticipations.is_empty();
    if !has_any {
        return None;
    }
    let mut block = String::from("Where your attention currently is:");
    if let Some(focus) = &model.current_focus {
        block.push_str(&format!("\nCurrent focus: {}", focus));
    }
    if !model.unresolved_threads.is_empty() {
        block.push_str(&format!(
            "\nUnresolved threads: {}",
            model.unresolved_threads.join("; ")
        ));
    }
    if !model.anticipations.is_empty() {
        block.push_str(&format!(
            "\nAnticipations: {}",
            model.anticipations.join("; ")
        ));
    }
    Some(block)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}
