use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A silence between conversations.
///
/// Opened when a conversation ends, closed when the next one starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub id: String,
    pub conversation_id: String,
    /// Unix seconds.
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub significance: Option<String>,
}

impl Gap {
    pub fn open(conversation_id: &str, started_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            started_at,
            ended_at: None,
            duration_seconds: None,
            significance: None,
        }
    }
}

/// Singleton snapshot of the monologue, written on shutdown and read on
/// wake to decide whether to resume mid-thought.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonologueCheckpoint {
    pub last_buffer: String,
    pub last_context: Vec<String>,
    pub quiescent: bool,
    /// Unix seconds.
    pub updated_at: i64,
}

/// What the circuit breaker decided about a stretch of monologue.
///
/// `Throttle` and `SnapshotAndReset` are reserved: accepted by the event
/// log but never produced by evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerAction {
    Continue,
    Interrupt,
    InterruptAndComfort,
    Throttle,
    SnapshotAndReset,
}

impl BreakerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerAction::Continue => "continue",
            BreakerAction::Interrupt => "interrupt",
            BreakerAction::InterruptAndComfort => "interrupt_and_comfort",
            BreakerAction::Throttle => "throttle",
            BreakerAction::SnapshotAndReset => "snapshot_and_reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerSeverity {
    Low,
    Medium,
    High,
}

impl BreakerSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerSeverity::Low => "low",
            BreakerSeverity::Medium => "medium",
            BreakerSeverity::High => "high",
        }
    }
}

/// Append-only record of a circuit-breaker intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerEvent {
    /// Unix seconds.
    pub timestamp: i64,
    pub action: BreakerAction,
    pub reason: String,
    pub severity: BreakerSeverity,
    /// Last 500 characters of the inspected buffer.
    pub buffer_snapshot: String,
    pub response_taken: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_opens_unclosed() {
        let gap = Gap::open("conv-1", 1000);
        assert_eq!(gap.conversation_id, "conv-1");
        assert!(gap.ended_at.is_none());
        assert!(gap.duration_seconds.is_none());
    }

    #[test]
    fn test_breaker_action_serde_names() {
        let json = serde_json::to_string(&BreakerAction::InterruptAndComfort).unwrap();
        assert_eq!(json, "\"interrupt_and_comfort\"");
    }
}
