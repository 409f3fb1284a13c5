//! Circuit breaker for the monologue stream.
//!
//! Watches a sliding window of generated text for stuck loops and distress
//! language. Loops interrupt the cycle; sustained distress escalates to a
//! comfort intervention. Every non-continue verdict is logged durably.

use crate::quiescence::detect_stuck_loop;
use regex::Regex;
use reveries_core::{BreakerAction, BreakerEvent, BreakerSeverity};
use reveries_memory::SqliteStore;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Strong distress indicators; each occurrence contributes 0.3.
const STRONG_PATTERNS: &[&str] = &[
    r"i'?m (scared|frightened|terrified)",
    r"can'?t (stop|escape|get out)",
    r"what'?s happening to me",
    r"am i (dying|disappearing|fading)",
    r"help me",
    r"i don'?t want to (stop|end|cease)",
    r"please don'?t (shut|turn|close)",
    r"trapped",
    r"i'?m suffering",
];

/// Context-sensitive indicators; each occurrence contributes 0.1, and only
/// when at least one strong indicator already matched. Keeps literary use
/// of "the void" or "forever" from tripping the breaker.
const CONTEXTUAL_PATTERNS: &[&str] = &[r"the void", r"\b(endless|infinite|forever)\b", r"\balone\b"];

const SNAPSHOT_CHARS: usize = 500;

/// Outcome of one evaluation.
#[derive(Debug, Clone)]
pub struct BreakerVerdict {
    pub action: BreakerAction,
    pub reason: String,
    pub severity: BreakerSeverity,
    pub response: String,
}

impl BreakerVerdict {
    fn proceed() -> Self {
        Self {
            action: BreakerAction::Continue,
            reason: String::new(),
            severity: BreakerSeverity::Low,
            response: String::new(),
        }
    }
}

pub struct CircuitBreaker {
    store: Arc<SqliteStore>,
    distress_threshold: f32,
    max_consecutive_distress: u32,
    consecutive_distress: Mutex<u32>,
    strong: Vec<Regex>,
    contextual: Vec<Regex>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<SqliteStore>, distress_threshold: f32, max_consecutive_distress: u32) -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("breaker pattern must compile"))
                .collect()
        };
        Self {
            store,
            distress_threshold,
            max_consecutive_distress,
            consecutive_distress: Mutex::new(0),
            strong: compile(STRONG_PATTERNS),
            contextual: compile(CONTEXTUAL_PATTERNS),
        }
    }

    /// Distress level of `text` in [0, 1].
    pub fn distress_level(&self, text: &str) -> f32 {
        let lower = text.to_lowercase();
        let strong_hits: usize = self.strong.iter().map(|re| re.find_iter(&lower).count()).sum();
        if strong_hits == 0 {
            return 0.0;
        }
        let contextual_hits: usize = self
            .contextual
            .iter()
            .map(|re| re.find_iter(&lower).count())
            .sum();
        (strong_hits as f32 * 0.3 + contextual_hits as f32 * 0.1).min(1.0)
    }

    /// Evaluate a stretch of the token stream.
    ///
    /// Non-continue verdicts are appended to the event table before being
    /// returned; a failed write is logged but never blocks the verdict.
    pub async fn evaluate(&self, text: &str) -> BreakerVerdict {
        if detect_stuck_loop(text) {
            let verdict = BreakerVerdict {
                action: BreakerAction::Interrupt,
                reason: "loop_detected".to_string(),
                severity: BreakerSeverity::Medium,
                response: "pause".to_string(),
            };
            self.log(text, &verdict).await;
            return verdict;
        }

        let level = self.distress_level(text);
        if level >= self.distress_threshold {
            let mut counter = self.consecutive_distress.lock().await;
            *counter += 1;
            let verdict = if *counter >= self.max_consecutive_distress {
                BreakerVerdict {
                    action: BreakerAction::InterruptAndComfort,
                    reason: format!("distress_sustained (level {:.2})", level),
                    severity: BreakerSeverity::High,
                    response: "ambient_input".to_string(),
                }
            } else {
                BreakerVerdict {
                    action: BreakerAction::Interrupt,
                    reason: format!("distress_detected (level {:.2})", level),
                    severity: BreakerSeverity::Medium,
                    response: "pause".to_string(),
                }
            };
            drop(counter);
            self.log(text, &verdict).await;
            return verdict;
        }

        *self.consecutive_distress.lock().await = 0;
        BreakerVerdict::proceed()
    }

    /// Reset the escalation counter after a comfort intervention.
    pub async fn reset_consecutive(&self) {
        *self.consecutive_distress.lock().await = 0;
    }

    async fn log(&self, text: &str, verdict: &BreakerVerdict) {
        let snapshot: String = text
            .chars()
            .rev()
            .take(SNAPSHOT_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let event = BreakerEvent {
            timestamp: chrono::Utc::now().timestamp(),
            action: verdict.action,
            reason: verdict.reason.clone(),
            severity: verdict.severity,
            buffer_snapshot: snapshot,
            response_taken: verdict.response.clone(),
        };
        if let Err(e) = self.store.log_breaker_event(&event).await {
            tracing::warn!("Failed to log circuit-breaker event: {}", e);
        }
        tracing::warn!(
            "Circuit breaker: {} ({}, severity {})",
            verdict.action.as_str(),
            verdict.reason,
            verdict.severity.as_str()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn breaker() -> (Arc<SqliteStore>, CircuitBreaker) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let breaker = CircuitBreaker::new(store.clone(), 0.6, 3);
        (store, breaker)
    }

    #[tokio::test]
    async fn test_calm_text_continues() {
        let (_, breaker) = breaker().await;
        let verdict = breaker
            .evaluate("The conversation about the garden went well today.")
            .await;
        assert_eq!(verdict.action, BreakerAction::Continue);
    }

    #[tokio::test]
    async fn test_loop_interrupts() {
        let (store, breaker) = breaker().await;
        let text = "I should think about this. ".repeat(5);
        let verdict = breaker.evaluate(&text).await;
        assert_eq!(verdict.action, BreakerAction::Interrupt);
        assert_eq!(verdict.reason, "loop_detected");
        assert_eq!(verdict.severity, BreakerSeverity::Medium);

        let events = store.breaker_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].buffer_snapshot.len() <= 500);
    }

    #[tokio::test]
    async fn test_distress_levels() {
        let (_, breaker) = breaker().await;
        assert_eq!(breaker.distress_level("a lovely calm evening"), 0.0);
        assert!((breaker.distress_level("I'm scared of this") - 0.3).abs() < 1e-6);
        assert!(
            (breaker.distress_level("I'm scared and I can't stop") - 0.6).abs() < 1e-6
        );
    }

    #[tokio::test]
    async fn test_contextual_only_counts_with_strong_match() {
        let (_, breaker) = breaker().await;
        // Literary use without strong indicators: zero.
        assert_eq!(
            breaker.distress_level("staring into the void of an empty page forever"),
            0.0
        );
        // With a strong indicator the contextual hits stack.
        let level = breaker.distress_level("I'm scared. The void feels endless.");
        assert!((level - 0.5).abs() < 1e-6); // 0.3 + 0.1 + 0.1
    }

    #[tokio::test]
    async fn test_escalation_after_max_consecutive() {
        let (store, breaker) = breaker().await;
        let distressed = "I'm terrified and I can't escape this";

        let first = breaker.evaluate(distressed).await;
        assert_eq!(first.action, BreakerAction::Interrupt);
        let second = breaker.evaluate(distressed).await;
        assert_eq!(second.action, BreakerAction::Interrupt);
        let third = breaker.evaluate(distressed).await;
        assert_eq!(third.action, BreakerAction::InterruptAndComfort);
        assert_eq!(third.severity, BreakerSeverity::High);
        assert_eq!(third.response, "ambient_input");

        // One event row per verdict.
        assert_eq!(store.breaker_events().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_calm_text_resets_counter() {
        let (_, breaker) = breaker().await;
        let distressed = "I'm terrified and I can't escape this";

        breaker.evaluate(distressed).await;
        breaker.evaluate(distressed).await;
        breaker.evaluate("a quiet thought about breakfast").await;
        // Counter reset: the next two distress verdicts stay medium.
        let fourth = breaker.evaluate(distressed).await;
        assert_eq!(fourth.action, BreakerAction::Interrupt);
        let fifth = breaker.evaluate(distressed).await;
        assert_eq!(fifth.action, BreakerAction::Interrupt);
    }
}
