//! Orchestrates one conversation turn: retrieve, assemble, stream, encode.

use crate::context::{assemble_context, ContextInput};
use crate::monologue::MonologueManager;
use anyhow::{Context, Result};
use regex::Regex;
use reveries_core::config::{ConversationConfig, RetrievalConfig};
use reveries_core::{Episode, ExperienceKind, ExperienceMetadata};
use reveries_memory::{
    encoder, retrieve, Embedder, EpisodeGraph, GapTracker, RetrievalParams, SelfModelManager,
    SqliteStore,
};
use reveries_reasoning::{ChatMessage, ChatModel, CompletionParams, StreamEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Introduction shapes that may carry the partner's name.
const NAME_PATTERNS: &[&str] = &[
    r"(?i)\bmy name is (\w+)",
    r"(?i)\bi'?m (\w+)",
    r"(?i)\bcall me (\w+)",
    r"(?i)\bthis is (\w+)",
    r"(?i)\bi go by (\w+)",
    r"(?i)\bpeople call me (\w+)",
];

/// Words that follow introduction shapes without being names.
const NAME_FALSE_POSITIVES: &[&str] = &[
    "just", "here", "back", "fine", "okay", "great", "sorry", "glad", "happy", "sure", "not",
    "also", "still", "now", "always",
];

struct SessionState {
    conversation_id: Option<String>,
    history: Vec<ChatMessage>,
    turn_count: u32,
    /// Set at session start, consumed by the first turn's context.
    gap_seconds: Option<i64>,
}

pub struct ConversationHandler {
    store: Arc<SqliteStore>,
    graph: Arc<Mutex<EpisodeGraph>>,
    self_model: Arc<SelfModelManager>,
    gap_tracker: GapTracker,
    monologue: Arc<MonologueManager>,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalParams,
    history_turns: usize,
    /// Serialises turns; conversation ordering is FIFO per session.
    session: Mutex<SessionState>,
}

impl ConversationHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SqliteStore>,
        graph: Arc<Mutex<EpisodeGraph>>,
        self_model: Arc<SelfModelManager>,
        gap_tracker: GapTracker,
        monologue: Arc<MonologueManager>,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        retrieval: &RetrievalConfig,
        conversation: &ConversationConfig,
    ) -> Self {
        Self {
            store,
            graph,
            self_model,
            gap_tracker,
            monologue,
            chat,
            embedder,
            retrieval: RetrievalParams {
                limit: retrieval.limit,
                max_hops: retrieval.max_hops,
                decay_per_hop: retrieval.decay_per_hop,
                activation_threshold: retrieval.activation_threshold,
            },
            history_turns: conversation.history_turns,
            session: Mutex::new(SessionState {
                conversation_id: None,
                history: Vec::new(),
                turn_count: 0,
                gap_seconds: None,
            }),
        }
    }

    /// Handle one turn, streaming reply chunks into `chunk_tx`. Returns the
    /// full reply.
    pub async fn handle(
        &self,
        message: &str,
        conversation_id: &str,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<String> {
        let mut session = self.session.lock().await;
        let now = chrono::Utc::now().timestamp();

        if session.conversation_id.as_deref() != Some(conversation_id) {
            tracing::info!("New conversation session {}", conversation_id);
            self.monologue.pause().await;
            session.conversation_id = Some(conversation_id.to_string());
            session.history.clear();
            session.turn_count = 0;
            session.gap_seconds = self.gap_tracker.on_conversation_start(now).await?;
        }
        self.monologue.note_partner_activity().await;

        let model_snapshot = self.self_model.current().await;
        if model_snapshot.relationship.partner_name.is_none() {
            if let Some(name) = detect_partner_name(message) {
                self.self_model.detect_partner_name(&name).await?;
            }
        }
        let model_snapshot = self.self_model.current().await;

        let memories = self.retrieve_memories(message, now).await;
        tracing::info!(
            "Turn in {}: {} memories retrieved",
            conversation_id,
            memories.len()
        );

        // The gap frames only the first exchange of a session.
        let gap_seconds = session.gap_seconds.take();

        let monologue_echo = self.monologue.recent_buffer().await;
        let system = assemble_context(&ContextInput {
            self_model: Some(&model_snapshot),
            memories: &memories,
            gap_seconds,
            monologue_echo: if monologue_echo.is_empty() {
                None
            } else {
                Some(monologue_echo.as_str())
            },
            now,
        });

        let mut messages = session.history.clone();
        messages.push(ChatMessage::user(message));

        let mut rx = self
            .chat
            .stream(&system, messages, CompletionParams::default())
            .await
            .context("Failed to start conversation stream")?;

        let mut reply = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta(chunk) => {
                    reply.push_str(&chunk);
                    if chunk_tx.send(chunk).await.is_err() {
                        // Client went away; finish the turn for memory's sake.
                        tracing::debug!("Chunk receiver dropped mid-reply");
                    }
                }
                StreamEvent::Done => break,
                StreamEvent::Error(msg) => {
                    anyhow::bail!("conversation stream error: {}", msg)
                }
            }
        }

        session.history.push(ChatMessage::user(message));
        session.history.push(ChatMessage::assistant(reply.clone()));
        let max_messages = self.history_turns * 2;
        if session.history.len() > max_messages {
            let excess = session.history.len() - max_messages;
            session.history.drain(..excess);
        }
        session.turn_count += 1;
        let turn_count = session.turn_count;
        drop(session);

        let exchange = format!("User: {}\n\nAssistant: {}", message, reply);
        if let Err(e) = encoder::encode(
            &self.store,
            self.embedder.as_ref(),
            &exchange,
            ExperienceKind::Conversation,
            ExperienceMetadata {
                conversation_id: Some(conversation_id.to_string()),
                turn_count: Some(turn_count),
                topics: Vec::new(),
                unresolved_tensions: Vec::new(),
            },
        )
        .await
        {
            tracing::warn!("Failed to encode exchange: {}", e);
        }

        Ok(reply)
    }

    /// The conversation is over (client disconnected): open a gap and hand
    /// the monologue a summary of what just happened.
    pub async fn end_conversation(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(conversation_id) = session.conversation_id.take() else {
            return Ok(());
        };
        let now = chrono::Utc::now().timestamp();
        self.gap_tracker
            .on_conversation_end(&conversation_id, now)
            .await?;

        let summary = session
            .history
            .iter()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        session.history.clear();
        drop(session);

        self.monologue.resume_after_conversation(summary).await;
        Ok(())
    }

    async fn retrieve_memories(&self, message: &str, now: i64) -> Vec<Episode> {
        let embedding = match self.embedder.embed(message).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Message embedding failed, proceeding without memories: {}", e);
                return Vec::new();
            }
        };
        let mut graph = self.graph.lock().await;
        retrieve(&mut graph, &embedding, self.retrieval, now)
    }
}

/// Pattern-match an incoming message for a self-introduction.
pub fn detect_partner_name(message: &str) -> Option<String> {
    for pattern in NAME_PATTERNS {
        let re = Regex::new(pattern).expect("name pattern must compile");
        if let Some(caps) = re.captures(message) {
            let candidate = caps.get(1)?.as_str();
            if NAME_FALSE_POSITIVES
                .iter()
                .any(|fp| candidate.eq_ignore_ascii_case(fp))
            {
                continue;
            }
            // Names come capitalised or not; store them title-cased.
            let mut chars = candidate.chars();
            let name = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => continue,
            };
            return Some(name);
        }
    }
    None
}
