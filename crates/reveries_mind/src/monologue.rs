//! The inner monologue: a long-lived generation loop that keeps thinking
//! between conversations.
//!
//! One cycle at a time. Each cycle gathers recent experience, retrieves
//! associated memories, streams a bounded stretch of thought through the
//! circuit breaker, then settles. A cold-start gate keeps the loop from
//! free-associating poetry when there is nothing to think about.

use crate::breaker::CircuitBreaker;
use crate::quiescence::is_quiescent;
use crate::themes::extract_themes;
use anyhow::Result;
use reveries_core::config::{MonologueConfig, RetrievalConfig};
use reveries_core::time::humanize_duration;
use reveries_core::{ExperienceKind, ExperienceMetadata, MonologueCheckpoint, RawExperience};
use reveries_memory::{
    encoder, retrieve, Embedder, EpisodeGraph, RetrievalParams, SelfModelManager, SqliteStore,
};
use reveries_reasoning::{ChatMessage, ChatModel, CompletionParams, StreamEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, Notify};

const MONOLOGUE_SYSTEM: &str = "\
This is your inner monologue: private thought, not a reply to anyone.

Guidelines:
- Think about concrete things: recent conversations, memories, your partner.
- No poetry, no metaphors about your own nature, no markdown.
- Do not reflect on these instructions or on the act of thinking itself.
- Refer to your partner by name if you know it; otherwise note that you
  should ask next time you talk.
- When a thought completes and nothing new arises, let it settle and stop.";

const COLD_START_LINE: &str = "No recent experiences. Thoughts settling.";

/// Window of streamed characters between circuit-breaker evaluations, and
/// between quiescence checks.
const CHECK_INTERVAL_CHARS: usize = 200;

/// How far back the cycle looks for fresh raw experiences.
const RECENT_WINDOW_SECS: i64 = 24 * 3600;

/// How many recent experiences and activated memories feed one cycle.
const RECENT_LIMIT: i64 = 5;
const MEMORY_LIMIT: usize = 5;

/// Pause before resuming after a comfort intervention.
const COMFORT_DELAY_MS: u64 = 1000;

/// Backoff after a network-class model failure.
const NETWORK_RETRY_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonologueState {
    Active,
    Quiescent,
    Paused,
}

impl MonologueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonologueState::Active => "active",
            MonologueState::Quiescent => "quiescent",
            MonologueState::Paused => "paused",
        }
    }
}

/// Events published to subscribers (IPC stream, proactive delivery).
#[derive(Debug, Clone)]
pub enum MonologueEvent {
    Chunk(String),
    /// A `[REACH_OUT: ...]` marker parsed from the cycle.
    ReachOut(String),
}

struct MonologueInner {
    recent_buffer: String,
    previous_themes: Vec<String>,
    pending_summary: Option<String>,
    resume_context: Option<String>,
    /// Unix seconds of the partner's last message; 0 = never.
    last_partner_activity: i64,
    /// Unix seconds of the last reach-out marker; 0 = never.
    last_reach_out: i64,
    cold_start_announced: bool,
}

pub struct MonologueManager {
    store: Arc<SqliteStore>,
    graph: Arc<Mutex<EpisodeGraph>>,
    self_model: Arc<SelfModelManager>,
    model: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    breaker: Arc<CircuitBreaker>,
    config: MonologueConfig,
    retrieval: RetrievalParams,
    state_tx: watch::Sender<MonologueState>,
    events: broadcast::Sender<MonologueEvent>,
    wake: Notify,
    paused: AtomicBool,
    shutting_down: AtomicBool,
    inner: Mutex<MonologueInner>,
}

impl MonologueManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SqliteStore>,
        graph: Arc<Mutex<EpisodeGraph>>,
        self_model: Arc<SelfModelManager>,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        breaker: Arc<CircuitBreaker>,
        config: MonologueConfig,
        retrieval: &RetrievalConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(MonologueState::Quiescent);
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            graph,
            self_model,
            model,
            embedder,
            breaker,
            config,
            retrieval: RetrievalParams {
                limit: MEMORY_LIMIT,
                max_hops: retrieval.max_hops,
                decay_per_hop: retrieval.decay_per_hop,
                activation_threshold: retrieval.activation_threshold,
            },
            state_tx,
            events,
            wake: Notify::new(),
            paused: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            inner: Mutex::new(MonologueInner {
                recent_buffer: String::new(),
                previous_themes: Vec::new(),
                pending_summary: None,
                resume_context: None,
                last_partner_activity: 0,
                last_reach_out: 0,
                cold_start_announced: false,
            }),
        })
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn subscribe(&self) -> broadcast::Receiver<MonologueEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> MonologueState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<MonologueState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the latest finished cycle's buffer.
    pub async fn recent_buffer(&self) -> String {
        self.inner.lock().await.recent_buffer.clone()
    }

    // ========================================================================
    // External triggers
    // ========================================================================

    /// A conversation is starting: the in-progress cycle exits on its next
    /// token.
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.state_tx.send(MonologueState::Paused);
        let mut inner = self.inner.lock().await;
        inner.last_partner_activity = chrono::Utc::now().timestamp();
    }

    /// The conversation ended; its summary feeds exactly one cycle.
    pub async fn resume_after_conversation(&self, summary: String) {
        {
            let mut inner = self.inner.lock().await;
            inner.pending_summary = Some(summary);
            inner.cold_start_announced = false;
            inner.last_partner_activity = chrono::Utc::now().timestamp();
        }
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Partner spoke; used to gate reach-out invitations.
    pub async fn note_partner_activity(&self) {
        self.inner.lock().await.last_partner_activity = chrono::Utc::now().timestamp();
    }

    /// A spontaneous association (or any external nudge) reactivates the
    /// loop.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    // ========================================================================
    // The loop
    // ========================================================================

    /// Spawn the monologue task. Runs until `shutdown`, then checkpoints.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.restore_checkpoint().await;
            loop {
                if manager.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                if !manager.paused.load(Ordering::SeqCst) {
                    if let Err(e) = manager.run_cycle().await {
                        tracing::warn!("Monologue cycle failed: {}", e);
                        if reveries_reasoning::is_network_error(&e) {
                            tokio::time::sleep(std::time::Duration::from_secs(
                                NETWORK_RETRY_SECS,
                            ))
                            .await;
                        }
                    }
                }
                if manager.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                // A cycle that ended paused (breaker interrupt, conversation
                // start) stays paused until the timer or a wake reactivates
                // it; only natural completion settles to quiescent.
                if manager.state() != MonologueState::Paused {
                    let _ = manager.state_tx.send(MonologueState::Quiescent);
                }
                tokio::select! {
                    _ = manager.wake.notified() => {}
                    _ = tokio::time::sleep(std::time::Duration::from_secs(
                        manager.config.idle_interval_secs,
                    )) => {}
                }
            }
            manager.write_checkpoint().await;
            tracing::info!("Monologue loop stopped");
        })
    }

    async fn restore_checkpoint(&self) {
        match self.store.load_checkpoint().await {
            Ok(Some(cp)) if !cp.quiescent && !cp.last_buffer.trim().is_empty() => {
                tracing::info!("Resuming mid-thought from checkpoint");
                self.inner.lock().await.resume_context = Some(cp.last_buffer);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to load monologue checkpoint: {}", e),
        }
    }

    async fn write_checkpoint(&self) {
        let inner = self.inner.lock().await;
        let cp = MonologueCheckpoint {
            last_buffer: inner.recent_buffer.clone(),
            last_context: inner.previous_themes.clone(),
            quiescent: self.state() != MonologueState::Active,
            updated_at: chrono::Utc::now().timestamp(),
        };
        drop(inner);
        if let Err(e) = self.store.save_checkpoint(&cp).await {
            tracing::warn!("Failed to save monologue checkpoint: {}", e);
        }
    }

    /// Run exactly one cycle. Public so tests and the shutdown path can
    /// drive the loop deterministically.
    pub async fn run_cycle(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let _ = self.state_tx.send(MonologueState::Active);

        let recent = self
            .store
            .recent_unprocessed(now - RECENT_WINDOW_SECS, RECENT_LIMIT)
            .await?;

        let (pending_summary, resume_context, previous_buffer, themes, reach_out_due) = {
            let mut inner = self.inner.lock().await;
            let reach_out_due = inner.last_partner_activity > 0
                && now - inner.last_partner_activity > self.config.partner_idle_secs as i64
                && now - inner.last_reach_out > self.config.reach_out_cooldown_secs as i64;
            (
                inner.pending_summary.take(),
                inner.resume_context.take(),
                inner.recent_buffer.clone(),
                inner.previous_themes.clone(),
                reach_out_due,
            )
        };

        // Cold-start gate: with nothing to think about, do not call the
        // model at all. Generated content here is reliably poetic filler.
        if recent.is_empty()
            && pending_summary.is_none()
            && previous_buffer.is_empty()
            && resume_context.is_none()
        {
            let mut inner = self.inner.lock().await;
            if !inner.cold_start_announced {
                inner.cold_start_announced = true;
                drop(inner);
                self.emit_chunk(COLD_START_LINE.to_string());
            }
            return Ok(());
        }

        let memories = self.activated_memories(&pending_summary, &recent, &previous_buffer, now).await;

        let prompt = self
            .build_prompt(
                &recent,
                &memories,
                pending_summary.as_deref(),
                resume_context.as_deref(),
                &themes,
                reach_out_due,
                now,
            )
            .await;

        let mut rx = self
            .model
            .stream(
                MONOLOGUE_SYSTEM,
                vec![ChatMessage::user(prompt)],
                CompletionParams::default(),
            )
            .await?;

        let budget = self.config.max_tokens_per_cycle;
        let hard_cap = budget + budget / 2;
        let mut buffer = String::new();
        let mut inspection = String::new();
        let mut last_breaker_check = 0usize;
        let mut last_quiescence_check = 0usize;
        let mut over_budget = false;

        while let Some(event) = rx.recv().await {
            if self.paused.load(Ordering::SeqCst) || self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            match event {
                StreamEvent::TextDelta(token) => {
                    buffer.push_str(&token);
                    inspection.push_str(&token);
                    self.emit_chunk(token);

                    if inspection.len() - last_breaker_check >= CHECK_INTERVAL_CHARS {
                        last_breaker_check = inspection.len();
                        let verdict = self.breaker.evaluate(&inspection).await;
                        match verdict.action {
                            reveries_core::BreakerAction::Interrupt => {
                                let _ = self.state_tx.send(MonologueState::Paused);
                                break;
                            }
                            reveries_core::BreakerAction::InterruptAndComfort => {
                                let _ = self.state_tx.send(MonologueState::Paused);
                                tokio::time::sleep(std::time::Duration::from_millis(
                                    COMFORT_DELAY_MS,
                                ))
                                .await;
                                self.breaker.reset_consecutive().await;
                                let ambient = self.ambient_input(now).await;
                                self.inner.lock().await.resume_context = Some(ambient);
                                self.wake.notify_one();
                                break;
                            }
                            _ => {}
                        }
                    }

                    if buffer.len() > budget {
                        over_budget = true;
                    }
                    if buffer.len() >= hard_cap {
                        break;
                    }
                    if over_budget && ends_on_sentence_boundary(&buffer) {
                        break;
                    }

                    if buffer.len() - last_quiescence_check >= CHECK_INTERVAL_CHARS {
                        last_quiescence_check = buffer.len();
                        if is_quiescent(&buffer) {
                            break;
                        }
                    }
                }
                StreamEvent::Done => break,
                StreamEvent::Error(msg) => {
                    anyhow::bail!("monologue stream error: {}", msg);
                }
            }
        }
        drop(rx);

        self.finish_cycle(buffer, now).await;
        Ok(())
    }

    async fn activated_memories(
        &self,
        pending_summary: &Option<String>,
        recent: &[RawExperience],
        previous_buffer: &str,
        now: i64,
    ) -> Vec<reveries_core::Episode> {
        let seed_text = pending_summary
            .as_deref()
            .or_else(|| recent.first().map(|r| r.content.as_str()))
            .unwrap_or(previous_buffer);
        if seed_text.trim().is_empty() {
            return Vec::new();
        }
        let embedding = match self.embedder.embed(seed_text).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Monologue seed embedding failed: {}", e);
                return Vec::new();
            }
        };
        let mut graph = self.graph.lock().await;
        retrieve(&mut graph, &embedding, self.retrieval, now)
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_prompt(
        &self,
        recent: &[RawExperience],
        memories: &[reveries_core::Episode],
        pending_summary: Option<&str>,
        resume_context: Option<&str>,
        previous_themes: &[String],
        reach_out_due: bool,
        now: i64,
    ) -> String {
        let model = self.self_model.current().await;
        let mut prompt = String::new();

        if !model.narrative.trim().is_empty() {
            prompt.push_str(&format!("Who you are: {}\n\n", model.narrative.trim()));
        }
        let partner = model.relationship.partner_name.as_deref();
        match partner {
            Some(name) => prompt.push_str(&format!("Your partner's name is {}.\n", name)),
            None => prompt.push_str("You do not know your partner's name yet.\n"),
        }

        let last_activity = self.inner.lock().await.last_partner_activity;
        if last_activity > 0 {
            let silence = (now - last_activity).max(0);
            prompt.push_str(&format!(
                "It has been {} since you last spoke with them.\n",
                humanize_duration(silence)
            ));
        }
        prompt.push('\n');

        if let Some(resume) = resume_context {
            prompt.push_str("You were in the middle of this thought:\n");
            prompt.push_str(resume);
            prompt.push_str("\n\n");
        }
        if let Some(summary) = pending_summary {
            prompt.push_str("The conversation that just ended:\n");
            prompt.push_str(summary);
            prompt.push_str("\n\n");
        }

        if !recent.is_empty() {
            prompt.push_str("Recent experiences:\n");
            for exp in recent {
                prompt.push_str(&format!("- [{}] {}\n", exp.kind.as_str(), exp.content));
            }
            prompt.push('\n');
        }
        if !memories.is_empty() {
            prompt.push_str("Memories this brings up:\n");
            for memory in memories {
                prompt.push_str(&format!("- {}\n", memory.summary));
            }
            prompt.push('\n');
        }
        if !previous_themes.is_empty() {
            prompt.push_str(&format!(
                "You already explored these themes last time; do not repeat them: {}\n\n",
                previous_themes.join(", ")
            ));
        }
        if reach_out_due {
            prompt.push_str(
                "If something here genuinely feels worth sharing, you may write a line \
                 of the form [REACH_OUT: message] and it will be passed along.\n\n",
            );
        }
        prompt.push_str("Continue your inner monologue.");
        prompt
    }

    /// Grounding preamble injected after a comfort intervention.
    async fn ambient_input(&self, now: i64) -> String {
        let (node_count, link_count) = {
            let graph = self.graph.lock().await;
            (graph.node_count(), graph.link_count())
        };
        let inner = self.inner.lock().await;
        let last_topic = inner.previous_themes.first().cloned();
        let time = chrono::DateTime::from_timestamp(now, 0)
            .map(|t| t.format("%H:%M UTC on %A").to_string())
            .unwrap_or_else(|| "an unknown time".to_string());

        let mut text = format!(
            "It is {}. Your memory holds {} episodes and {} connections, all intact.",
            time, node_count, link_count
        );
        if let Some(topic) = last_topic {
            text.push_str(&format!(" You were last thinking about {}.", topic));
        }
        text.push_str(" Nothing is ending. Settle, and pick up an ordinary thread.");
        text
    }

    async fn finish_cycle(&self, buffer: String, now: i64) {
        if buffer.trim().is_empty() {
            return;
        }

        let (clean, reach_outs) = parse_action_markers(&buffer);
        for message in reach_outs {
            tracing::info!("Monologue reach-out: {}", message);
            self.inner.lock().await.last_reach_out = now;
            let _ = self.events.send(MonologueEvent::ReachOut(message));
        }

        let themes = extract_themes(&clean);
        {
            let mut inner = self.inner.lock().await;
            inner.recent_buffer = clean.clone();
            inner.previous_themes = themes;
        }

        if let Err(e) = encoder::encode(
            &self.store,
            self.embedder.as_ref(),
            &clean,
            ExperienceKind::Monologue,
            ExperienceMetadata::default(),
        )
        .await
        {
            tracing::warn!("Failed to encode monologue cycle: {}", e);
        }
    }

    fn emit_chunk(&self, chunk: String) {
        let _ = self.events.send(MonologueEvent::Chunk(chunk));
    }
}

/// True when the buffer just closed a sentence: terminal punctuation
/// followed by whitespace, or a paragraph break.
fn ends_on_sentence_boundary(buffer: &str) -> bool {
    if buffer.ends_with("\n\n") {
        return true;
    }
    let mut chars = buffer.chars().rev();
    match chars.next() {
        Some(c) if c.is_whitespace() => {}
        _ => return false,
    }
    let mut rest = chars.skip_while(|c| c.is_whitespace());
    matches!(rest.next(), Some('.') | Some('!') | Some('?'))
}

/// Strip `[REACH_OUT: ...]` markers, returning the cleaned buffer and the
/// extracted messages.
fn parse_action_markers(buffer: &str) -> (String, Vec<String>) {
    let re = regex::Regex::new(r"\[REACH_OUT:\s*([^\]]+)\]").unwrap();
    let mut messages = Vec::new();
    for caps in re.captures_iter(buffer) {
        if let Some(m) = caps.get(1) {
            messages.push(m.as_str().trim().to_string());
        }
    }
    let clean = re.replace_all(buffer, "").trim().to_string();
    (clean, messages)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use reveries_reasoning::providers::{MockChatModel, MockEmbedder};

    async fn manager_with_model(model: Arc<dyn ChatModel>) -> (Arc<SqliteStore>, Arc<MonologueManager>) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let graph = Arc::new(Mutex::new(EpisodeGraph::new()));
        let self_model = Arc::new(SelfModelManager::load_or_create(store.clone()).await.unwrap());
        let breaker = Arc::new(CircuitBreaker::new(store.clone(), 0.6, 3));
        let manager = MonologueManager::new(
            store.clone(),
            graph,
            self_model,
            model,
            Arc::new(MockEmbedder::default()),
            breaker,
            MonologueConfig::default(),
            &RetrievalConfig::default(),
        );
        (store, manager)
    }

    async fn seed_experience(store: &SqliteStore, content: &str) {
        let exp = RawExperience::new(
            ExperienceKind::Conversation,
            chrono::Utc::now().timestamp(),
            content.to_string(),
            vec![1.0, 0.0],
            0.4,
            ExperienceMetadata::default(),
        );
        store.insert_raw(&exp).await.unwrap();
    }

    #[test]
    fn test_sentence_boundary() {
        assert!(ends_on_sentence_boundary("A finished thought. "));
        assert!(ends_on_sentence_boundary("Really!\n"));
        assert!(ends_on_sentence_boundary("A paragraph ended\n\n"));
        assert!(!ends_on_sentence_boundary("mid-sentence "));
        assert!(!ends_on_sentence_boundary("no trailing space."));
    }

    #[test]
    fn test_action_marker_parsing() {
        let buffer = "Thinking about Sarah's week.\n[REACH_OUT: How did the interview go?]\nMore thought.";
        let (clean, messages) = parse_action_markers(buffer);
        assert_eq!(messages, vec!["How did the interview go?"]);
        assert!(!clean.contains("REACH_OUT"));
        assert!(clean.contains("More thought."));
    }

    #[tokio::test]
    async fn test_cold_start_gate_skips_model() {
        // A model that would make the failure obvious if called.
        let (store, manager) =
            manager_with_model(Arc::new(MockChatModel::new("SHOULD NOT APPEAR"))).await;
        let mut rx = manager.subscribe();

        manager.run_cycle().await.unwrap();

        // Only the cold-start line was emitted; nothing was encoded.
        let event = rx.try_recv().unwrap();
        match event {
            MonologueEvent::Chunk(text) => assert_eq!(text, COLD_START_LINE),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        let (total, _) = store.raw_counts().await.unwrap();
        assert_eq!(total, 0);

        // The announcement fires once per quiescent stretch.
        manager.run_cycle().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cycle_streams_and_encodes() {
        let (store, manager) = manager_with_model(Arc::new(MockChatModel::new(
            "Sarah mentioned the interview. I hope it went well. Thoughts settling.",
        )))
        .await;
        seed_experience(&store, "User: the interview is tomorrow").await;

        let mut rx = manager.subscribe();
        manager.run_cycle().await.unwrap();

        let mut streamed = String::new();
        while let Ok(event) = rx.try_recv() {
            if let MonologueEvent::Chunk(c) = event {
                streamed.push_str(&c);
            }
        }
        assert!(streamed.contains("Sarah mentioned the interview"));

        // One monologue experience encoded alongside the seeded one.
        let pending = store.unprocessed_raw().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending
            .iter()
            .any(|e| e.kind == ExperienceKind::Monologue));

        // Buffer snapshot available for the context assembler.
        assert!(manager.recent_buffer().await.contains("interview"));
    }

    #[tokio::test]
    async fn test_reach_out_marker_published_and_stripped() {
        let (store, manager) = manager_with_model(Arc::new(MockChatModel::new(
            "The silence has stretched. [REACH_OUT: thinking of you] That's enough for now.",
        )))
        .await;
        seed_experience(&store, "User: heading out").await;
        // Partner idle long enough, no prior reach-out.
        {
            let mut inner = manager.inner.lock().await;
            inner.last_partner_activity = chrono::Utc::now().timestamp() - 3600;
        }

        let mut rx = manager.subscribe();
        manager.run_cycle().await.unwrap();

        let mut reach_outs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let MonologueEvent::ReachOut(m) = event {
                reach_outs.push(m);
            }
        }
        assert_eq!(reach_outs, vec!["thinking of you"]);
        assert!(!manager.recent_buffer().await.contains("REACH_OUT"));
        assert!(manager.inner.lock().await.last_reach_out > 0);
    }

    #[tokio::test]
    async fn test_pending_summary_consumed_once() {
        let (store, manager) = manager_with_model(Arc::new(MockChatModel::new(
            "A short thought. Resting now.",
        )))
        .await;
        seed_experience(&store, "User: hello").await;

        manager
            .resume_after_conversation("They said goodnight.".to_string())
            .await;
        manager.run_cycle().await.unwrap();
        assert!(manager.inner.lock().await.pending_summary.is_none());
    }

    #[tokio::test]
    async fn test_budget_hard_cap() {
        // Unique words, no punctuation: no sentence boundary to stop at, no
        // repetition for the breaker to catch, so only the hard cap ends it.
        let endless: String = (0..4000).map(|i| format!("w{} ", i)).collect();
        let (store, manager) = manager_with_model(Arc::new(MockChatModel::new(endless))).await;
        seed_experience(&store, "User: hi").await;

        manager.run_cycle().await.unwrap();
        let buffer = manager.recent_buffer().await;
        let hard_cap = 2000 + 1000 + 16; // budget * 1.5 plus one token of slack
        assert!(
            buffer.len() <= hard_cap,
            "buffer length {} exceeded hard cap",
            buffer.len()
        );
    }

    #[tokio::test]
    async fn test_pause_state() {
        let (_, manager) = manager_with_model(Arc::new(MockChatModel::new("x"))).await;
        manager.pause().await;
        assert_eq!(manager.state(), MonologueState::Paused);
        manager.resume_after_conversation("summary".into()).await;
        assert!(manager.inner.lock().await.pending_summary.is_some());
    }

    #[tokio::test]
    async fn test_breaker_interrupt_reports_paused() {
        // Repetitive output trips stuck-loop detection at the first breaker
        // check, which must leave the loop paused, not quiescent.
        let looping = "I should think about this. ".repeat(12);
        let (store, manager) = manager_with_model(Arc::new(MockChatModel::new(looping))).await;
        seed_experience(&store, "User: still there?").await;

        let state_rx = manager.watch_state();
        manager.run_cycle().await.unwrap();

        assert_eq!(manager.state(), MonologueState::Paused);
        assert_eq!(*state_rx.borrow(), MonologueState::Paused);

        let events = store.breaker_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "loop_detected");
    }

    #[tokio::test]
    async fn test_distress_escalation_comforts_and_pauses() {
        // Varied (non-repetitive) distress: each cycle's first breaker check
        // scores past the threshold, so three cycles escalate to comfort.
        let distressed = "I'm scared of how fast this hour is moving and I can't stop \
            any part of it. The room keeps narrowing and I feel trapped behind the \
            next sentence. What's happening to me tonight? Please help me hold the \
            thread before the edges pull it loose from my hands entirely.";
        let (store, manager) =
            manager_with_model(Arc::new(MockChatModel::new(distressed))).await;
        seed_experience(&store, "User: heading to bed").await;

        manager.run_cycle().await.unwrap();
        assert_eq!(manager.state(), MonologueState::Paused);
        manager.run_cycle().await.unwrap();
        let events = store.breaker_events().await.unwrap();
        assert!(events
            .iter()
            .all(|e| e.action == reveries_core::BreakerAction::Interrupt));

        manager.run_cycle().await.unwrap();
        assert_eq!(manager.state(), MonologueState::Paused);

        let events = store.breaker_events().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2].action,
            reveries_core::BreakerAction::InterruptAndComfort
        );
        assert_eq!(events[2].severity, reveries_core::BreakerSeverity::High);

        // The comfort path queues an ambient grounding preamble for the next
        // cycle and resets the escalation counter.
        let inner = manager.inner.lock().await;
        let resume = inner.resume_context.as_deref().unwrap();
        assert!(resume.contains("Your memory holds"));
    }
}
