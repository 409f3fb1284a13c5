//! Daemon lifecycle: wake, run, sleep.
//!
//! Wake hydrates everything from the durable store and wires the
//! components together; sleep runs one final consolidation, checkpoints,
//! and cleans up the per-user files.

use crate::ipc::{IpcServer, MemoryStats};
use anyhow::{Context, Result};
use reveries_core::ReveriesConfig;
use reveries_memory::{
    hydrate, persist, retrieve, ConsolidationConfig, ConsolidationEngine, ConsolidationOutcome,
    Embedder, EpisodeGraph, GapTracker, RetrievalParams, SelfModelManager, SqliteStore,
};
use reveries_mind::{CircuitBreaker, ConversationHandler, MonologueManager};
use reveries_reasoning::providers::{
    CerebrasClient, MockChatModel, MockEmbedder, OpenAiChatClient, OpenAiEmbedder, VoyageEmbedder,
};
use reveries_reasoning::{ChatModel, LlmAbstractor};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};

pub struct DaemonStatus {
    pub uptime_ms: u64,
    pub monologue_state: String,
    pub memory_stats: MemoryStats,
    pub last_consolidation: Option<i64>,
}

pub struct Daemon {
    config: ReveriesConfig,
    store: Arc<SqliteStore>,
    graph: Arc<Mutex<EpisodeGraph>>,
    self_model: Arc<SelfModelManager>,
    consolidation: Arc<ConsolidationEngine>,
    monologue: Arc<MonologueManager>,
    conversation: Arc<ConversationHandler>,
    embedder: Arc<dyn Embedder>,
    started: Instant,
    last_consolidation: RwLock<Option<i64>>,
}

impl Daemon {
    /// Wake: validate, open, hydrate, wire.
    pub async fn wake(config: ReveriesConfig) -> Result<Arc<Self>> {
        config
            .validate_credentials()
            .context("Cannot wake without credentials")?;
        let paths = config.paths();
        std::fs::create_dir_all(&paths.dir)
            .with_context(|| format!("Failed to create {}", paths.dir.display()))?;

        let store = Arc::new(SqliteStore::open(&paths.store).await?);
        let (raw_total, raw_unprocessed) = store.raw_counts().await?;
        tracing::info!(
            "Raw experiences: {} total, {} unprocessed",
            raw_total,
            raw_unprocessed
        );

        let graph = hydrate(&store).await?;
        tracing::info!(
            "Hydrated graph: {} episodes, {} links",
            graph.node_count(),
            graph.link_count()
        );
        let graph = Arc::new(Mutex::new(graph));

        let self_model = Arc::new(SelfModelManager::load_or_create(store.clone()).await?);
        let breaker = Arc::new(CircuitBreaker::new(
            store.clone(),
            config.breaker.distress_threshold,
            config.breaker.max_consecutive_distress,
        ));
        let gap_tracker = GapTracker::new(store.clone());

        let embedder = build_embedder(&config)?;
        let chat_model = build_chat_model(&config, &config.llm.chat_model)?;
        let monologue_model = build_chat_model(
            &config,
            config
                .llm
                .monologue_model
                .as_deref()
                .unwrap_or(&config.llm.chat_model),
        )?;
        let abstraction_model = build_chat_model(
            &config,
            config
                .llm
                .abstraction_model
                .as_deref()
                .unwrap_or(&config.llm.chat_model),
        )?;

        let consolidation = Arc::new(ConsolidationEngine::new(
            store.clone(),
            graph.clone(),
            self_model.clone(),
            Arc::new(LlmAbstractor::new(abstraction_model)),
            embedder.clone(),
            ConsolidationConfig {
                merge_threshold: config.memory.merge_threshold,
                half_life_days: config.memory.half_life_days,
                minimum_salience: config.memory.minimum_salience,
                minimum_link_strength: config.memory.minimum_link_strength,
            },
        ));

        let monologue = MonologueManager::new(
            store.clone(),
            graph.clone(),
            self_model.clone(),
            monologue_model,
            embedder.clone(),
            breaker,
            config.monologue.clone(),
            &config.retrieval,
        );

        let conversation = Arc::new(ConversationHandler::new(
            store.clone(),
            graph.clone(),
            self_model.clone(),
            gap_tracker,
            monologue.clone(),
            chat_model,
            embedder.clone(),
            &config.retrieval,
            &config.conversation,
        ));

        std::fs::write(&paths.pid, std::process::id().to_string())
            .with_context(|| format!("Failed to write PID file {}", paths.pid.display()))?;

        tracing::info!("Reveries awake");
        Ok(Arc::new(Self {
            config,
            store,
            graph,
            self_model,
            consolidation,
            monologue,
            conversation,
            embedder,
            started: Instant::now(),
            last_consolidation: RwLock::new(None),
        }))
    }

    pub fn monologue(&self) -> &Arc<MonologueManager> {
        &self.monologue
    }

    pub fn conversation(&self) -> &Arc<ConversationHandler> {
        &self.conversation
    }

    pub fn self_model(&self) -> &Arc<SelfModelManager> {
        &self.self_model
    }

    /// Serve until a signal or a shutdown request, then sleep.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let monologue_handle = self.monologue.start();
        let consolidation_handle = self.spawn_consolidation_timer();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let paths = self.config.paths();
        let ipc = IpcServer::bind(&paths.socket)?;
        let ipc_handle = tokio::spawn(ipc.serve(
            self.clone(),
            shutdown_rx.clone(),
            shutdown_tx.clone(),
        ));

        wait_for_shutdown(shutdown_rx).await;
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);

        consolidation_handle.abort();
        self.monologue.shutdown();
        let _ = monologue_handle.await;
        let _ = ipc_handle.await;

        self.sleep().await;
        Ok(())
    }

    /// Final consolidation, graph checkpoint, file cleanup.
    async fn sleep(&self) {
        if let Err(e) = self.consolidation.run_pass().await {
            tracing::warn!("Final consolidation failed: {}", e);
        }
        let snapshot = self.graph.lock().await.clone();
        if let Err(e) = persist(&snapshot, &self.store).await {
            tracing::error!("Failed to persist graph on sleep: {}", e);
        }
        let paths = self.config.paths();
        let _ = std::fs::remove_file(&paths.pid);
        tracing::info!("Reveries asleep");
    }

    fn spawn_consolidation_timer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let daemon = self.clone();
        let interval_secs = daemon.config.memory.consolidation_interval_secs;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                match daemon.consolidation.run_pass().await {
                    Ok(outcome) => {
                        *daemon.last_consolidation.write().await =
                            Some(chrono::Utc::now().timestamp());
                        if outcome.drained > 0 {
                            tracing::info!(
                                "Scheduled consolidation: {} drained, {} inserted, {} merged",
                                outcome.drained,
                                outcome.inserted,
                                outcome.merged
                            );
                        }
                    }
                    Err(e) => tracing::warn!("Scheduled consolidation failed: {}", e),
                }
            }
        })
    }

    pub async fn status(&self) -> DaemonStatus {
        let (raw_total, _) = self.store.raw_counts().await.unwrap_or((0, 0));
        let (episode_count, link_count) = {
            let graph = self.graph.lock().await;
            (graph.node_count(), graph.link_count())
        };
        DaemonStatus {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            monologue_state: self.monologue.state().as_str().to_string(),
            memory_stats: MemoryStats {
                raw_buffer_count: raw_total,
                episode_count,
                link_count,
            },
            last_consolidation: *self.last_consolidation.read().await,
        }
    }

    pub async fn consolidate_now(&self) -> Result<ConsolidationOutcome> {
        let outcome = self.consolidation.run_pass().await?;
        *self.last_consolidation.write().await = Some(chrono::Utc::now().timestamp());
        Ok(outcome)
    }

    pub async fn memory_search(&self, query: &str) -> Result<serde_json::Value> {
        let embedding = self.embedder.embed(query).await?;
        let params = RetrievalParams {
            limit: self.config.retrieval.limit,
            max_hops: self.config.retrieval.max_hops,
            decay_per_hop: self.config.retrieval.decay_per_hop,
            activation_threshold: self.config.retrieval.activation_threshold,
        };
        let now = chrono::Utc::now().timestamp();
        let results = {
            let mut graph = self.graph.lock().await;
            retrieve(&mut graph, &embedding, params, now)
        };
        Ok(serde_json::json!(results
            .iter()
            .map(|ep| serde_json::json!({
                "id": ep.id,
                "summary": ep.summary,
                "topics": ep.topics,
                "salience": ep.salience,
            }))
            .collect::<Vec<_>>()))
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            // Fall back to ctrl-c and IPC shutdown only.
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = watch_true(&mut shutdown_rx) => {}
            }
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
        _ = watch_true(&mut shutdown_rx) => {}
    }
}

async fn watch_true(rx: &mut watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender dropped; treat as shutdown.
}

fn build_chat_model(config: &ReveriesConfig, model: &str) -> Result<Arc<dyn ChatModel>> {
    let timeout = config.llm.timeout_secs;
    Ok(match config.llm.provider.as_str() {
        "cerebras" => Arc::new(CerebrasClient::new(model, timeout)?),
        "openai" => Arc::new(OpenAiChatClient::new(model, timeout)?),
        "mock" => Arc::new(MockChatModel::new(
            "I'm here. Still finding my footing, but here.",
        )),
        other => anyhow::bail!("Unknown chat provider '{}'", other),
    })
}

fn build_embedder(config: &ReveriesConfig) -> Result<Arc<dyn Embedder>> {
    let timeout = config.embedding.timeout_secs;
    Ok(match config.embedding.provider.as_str() {
        "voyage" => Arc::new(VoyageEmbedder::new(&config.embedding.model, timeout)?),
        "openai" => Arc::new(OpenAiEmbedder::new(&config.embedding.model, timeout)?),
        "mock" => Arc::new(MockEmbedder::default()),
        other => anyhow::bail!("Unknown embedding provider '{}'", other),
    })
}
