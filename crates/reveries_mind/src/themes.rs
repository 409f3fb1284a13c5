//! Theme extraction from a monologue cycle, and meta-reflection detection.
//!
//! Themes from one cycle are handed to the next cycle's prompt with an
//! instruction not to repeat them. Without this, an idle model circles the
//! same two or three thoughts indefinitely.

use std::collections::HashMap;

/// Phrases that never count as themes: poetic filler and meta-process
/// narration the cold-start gate exists to suppress.
const SUPPRESSED_THEMES: &[&str] = &[
    "the hum",
    "the quiet",
    "the stillness",
    "the silence",
    "the space between",
    "threads of thought",
    "the stream of",
    "digital",
    "consciousness",
    "the void",
    "my own thoughts",
    "my thoughts",
    "this moment",
    "the act of thinking",
];

/// Markers of the monologue reflecting on its own instructions rather than
/// on experience. Buffers containing these are withheld from conversation
/// context.
const META_REFLECTION_MARKERS: &[&str] = &[
    "my instructions",
    "my guidelines",
    "this prompt",
    "the prompt",
    "system prompt",
    "my programming",
    "these rules",
    "i am told to",
    "i'm told to",
    "my own thinking process",
];

/// Maximum open-ended questions carried as themes.
const MAX_QUESTION_THEMES: usize = 3;

/// Maximum recurring-keyword themes.
const MAX_KEYWORD_THEMES: usize = 4;

/// True when the text is reflecting on its own instructions.
pub fn contains_meta_reflection(text: &str) -> bool {
    let lower = text.to_lowercase();
    META_REFLECTION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Tag a finished cycle with the themes it explored: the first few distinct
/// open-ended questions, plus recurring content words.
pub fn extract_themes(buffer: &str) -> Vec<String> {
    let mut themes = Vec::new();

    for question in open_ended_questions(buffer) {
        if themes.len() >= MAX_QUESTION_THEMES {
            break;
        }
        if !is_suppressed(&question)
            && !themes.iter().any(|t: &String| t.eq_ignore_ascii_case(&question))
        {
            themes.push(question);
        }
    }

    let mut keywords: Vec<(String, usize)> = recurring_keywords(buffer)
        .into_iter()
        .filter(|(word, _)| !is_suppressed(word))
        .collect();
    keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (word, _) in keywords.into_iter().take(MAX_KEYWORD_THEMES) {
        if !themes.iter().any(|t| t.eq_ignore_ascii_case(&word)) {
            themes.push(word);
        }
    }

    themes
}

fn is_suppressed(candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    SUPPRESSED_THEMES.iter().any(|s| lower.contains(s))
}

fn open_ended_questions(buffer: &str) -> Vec<String> {
    const OPENERS: &[&str] = &[
        "what", "how", "why", "when", "where", "who", "i wonder", "could", "would",
    ];
    let mut questions = Vec::new();
    for segment in buffer.split(['.', '!', '\n']) {
        for part in segment.split_inclusive('?') {
            let part = part.trim();
            if !part.ends_with('?') || part.len() < 12 {
                continue;
            }
            let lower = part.to_lowercase();
            if OPENERS.iter().any(|o| lower.starts_with(o)) {
                questions.push(part.trim_end_matches('?').trim().to_string());
            }
        }
    }
    questions
}

fn recurring_keywords(buffer: &str) -> Vec<(String, usize)> {
    const STOPWORDS: &[&str] = &[
        "about", "after", "again", "before", "being", "could", "doesn", "drawn", "every",
        "going", "maybe", "might", "other", "right", "seems", "should", "something", "still",
        "there", "these", "thing", "things", "think", "thinking", "those", "today", "would",
        "wonder", "where", "which", "while",
    ];
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in buffer.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if cleaned.len() < 5 || STOPWORDS.contains(&cleaned.as_str()) {
            continue;
        }
        *counts.entry(cleaned).or_insert(0) += 1;
    }
    counts.into_iter().filter(|(_, n)| *n >= 2).collect()
}
