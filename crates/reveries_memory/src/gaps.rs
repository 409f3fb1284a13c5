//! Tracks the silences between conversations.

use crate::store::SqliteStore;
use anyhow::Result;
use reveries_core::time::seconds_since;
use reveries_core::Gap;
use std::sync::Arc;

#[derive(Clone)]
pub struct GapTracker {
    store: Arc<SqliteStore>,
}

impl GapTracker {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// A conversation just ended: open a gap.
    pub async fn on_conversation_end(&self, conversation_id: &str, now: i64) -> Result<()> {
        // One open gap at a time; a dangling one means the previous close
        // never happened (crash mid-conversation), so close it first.
        if let Some(stale) = self.store.open_gap().await? {
            let duration = seconds_since(stale.started_at, now);
            self.store.close_gap(&stale.id, now, duration).await?;
        }
        self.store.insert_gap(&Gap::open(conversation_id, now)).await
    }

    /// A conversation just started: close the open gap, returning how long
    /// the silence lasted. `None` when there was no recorded gap (first
    /// conversation ever, or a crash swallowed it).
    pub async fn on_conversation_start(&self, now: i64) -> Result<Option<i64>> {
        let Some(gap) = self.store.open_gap().await? else {
            return Ok(None);
        };
        let duration = seconds_since(gap.started_at, now);
        self.store.close_gap(&gap.id, now, duration).await?;
        Ok(Some(duration))
    }
}
