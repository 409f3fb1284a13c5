//! Quiescence detection: has the monologue settled, or is it stuck?
//!
//! Settling is recognised from a fixed set of closing phrases near the end
//! of the buffer. Being stuck is recognised structurally, from repetition,
//! so a model looping on a phrase is stopped whatever the phrase is.

/// Phrases anywhere in the buffer's tail that signal natural settling.
const SETTLING_PHRASES: &[&str] = &[
    "i've processed",
    "i have processed",
    "thoughts settling",
    "thoughts settled",
    "nothing more to",
    "at peace with",
    "resting now",
    "that's all for now",
    "that's enough for now",
    "i'm content with",
];

/// Lower-signal phrases accepted only at the very end of the buffer.
const END_ANCHORED_PHRASES: &[&str] = &["thoughts settle.", "letting this rest.", "enough for now."];

/// How much of the buffer's tail the settling scan looks at.
const TAIL_WINDOW: usize = 200;

/// True when the buffer has reached a natural stopping point, either by a
/// settling phrase or by stuck-loop detection.
pub fn is_quiescent(buffer: &str) -> bool {
    let trimmed = buffer.trim_end();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_lowercase();

    let tail_start = lower.len().saturating_sub(TAIL_WINDOW);
    let tail = &lower[floor_char_boundary(&lower, tail_start)..];
    if SETTLING_PHRASES.iter().any(|p| tail.contains(p)) {
        return true;
    }
    if END_ANCHORED_PHRASES.iter().any(|p| lower.ends_with(p)) {
        return true;
    }

    detect_stuck_loop(buffer)
}

/// Structural repetition detection. Two signals, either sufficient:
///
/// (a) sentence-level: with at least 4 substantial sentences, a unique
/// ratio under 0.30 means the buffer is circling;
/// (b) consecutive-phrase: the same L-word chunk repeated back to back
/// (three times for short chunks, twice for chunks of 4+ words).
pub fn detect_stuck_loop(text: &str) -> bool {
    sentence_level_stuck(text) || consecutive_phrase_stuck(text)
}

fn sentence_level_stuck(text: &str) -> bool {
    let sentences: Vec<String> = text
        .split(['.', '!', '?'])
        .map(|s| s.trim())
        .filter(|s| s.len() > 10)
        .map(|s| s.to_lowercase())
        .collect();
    if sentences.len() < 4 {
        return false;
    }
    let unique: std::collections::HashSet<&str> =
        sentences.iter().map(|s| s.as_str()).collect();
    (unique.len() as f32 / sentences.len() as f32) < 0.30
}

fn consecutive_phrase_stuck(text: &str) -> bool {
    let words: Vec<String> = text
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    let max_len = (words.len() / 3).min(15);
    for phrase_len in 1..=max_len {
        let needed = if phrase_len < 4 { 3 } else { 2 };
        let mut i = 0;
        while i + phrase_len <= words.len() {
            let mut repeats = 1;
            while i + (repeats + 1) * phrase_len <= words.len()
                && words[i..i + phrase_len]
                    == words[i + repeats * phrase_len..i + (repeats + 1) * phrase_len]
            {
                repeats += 1;
                if repeats >= needed {
                    return true;
                }
            }
            i += 1;
        }
    }
    false
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
