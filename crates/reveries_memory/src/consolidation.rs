//! Consolidation: drain raw experiences, abstract them into episodes,
//! merge near-duplicates, form links, update the self-model, decay,
//! checkpoint.
//!
//! The abstraction model call and all embedding happen before the graph
//! lock is taken; graph mutation is batched afterwards so conversations
//! only ever see a pre- or post-pass graph.

use crate::embedding::{Embedder, Embedding};
use crate::graph::EpisodeGraph;
use crate::hydrator;
use crate::self_model::SelfModelManager;
use crate::store::SqliteStore;
use anyhow::Result;
use async_trait::async_trait;
use reveries_core::{Episode, EpisodeLink, Exemplar, LinkKind, RawExperience};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Merged episodes keep at most this many exemplars (oldest dropped) so
/// repeated merges cannot grow rows without bound.
const MAX_EXEMPLARS: usize = 10;

/// How many existing neighbours a freshly inserted episode links to.
const INSERT_LINK_FANOUT: usize = 3;
const INSERT_LINK_STRENGTH: f32 = 0.5;

/// Strength added to every outgoing link of a node that absorbs a merge.
const MERGE_LINK_BOOST: f32 = 0.1;

// ============================================================================
// Abstraction contract
// ============================================================================

/// One exemplar as the abstraction model returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct ExemplarCandidate {
    pub quote: String,
    #[serde(default)]
    pub significance: String,
}

/// One candidate episode from the abstraction model.
#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeCandidate {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_candidate_score")]
    pub salience: f32,
    #[serde(default = "default_candidate_score")]
    pub confidence: f32,
    #[serde(default)]
    pub exemplars: Vec<ExemplarCandidate>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_candidate_score() -> f32 {
    0.5
}

/// Self-model deltas from one abstraction call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SelfModelUpdates {
    pub current_focus: Option<String>,
    pub new_tendency: Option<String>,
    pub new_value: Option<String>,
    pub narrative_update: Option<String>,
}

/// Structured reply from the abstraction model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AbstractionReply {
    pub episodes: Vec<EpisodeCandidate>,
    pub self_model_updates: SelfModelUpdates,
}

/// The abstraction model behind the consolidation pass.
#[async_trait]
pub trait Abstractor: Send + Sync {
    async fn abstract_experiences(
        &self,
        experiences: &[RawExperience],
        narrative: &str,
    ) -> Result<AbstractionReply>;
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub merge_threshold: f32,
    pub half_life_days: f64,
    pub minimum_salience: f32,
    pub minimum_link_strength: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.85,
            half_life_days: 30.0,
            minimum_salience: 0.1,
            minimum_link_strength: 0.05,
        }
    }
}

/// What one pass did.
#[derive(Debug, Default)]
pub struct ConsolidationOutcome {
    pub drained: usize,
    pub inserted: usize,
    pub merged: usize,
    /// Set when the abstraction call failed and only decay/persist ran.
    pub aborted: Option<String>,
}

pub struct ConsolidationEngine {
    store: Arc<SqliteStore>,
    graph: Arc<Mutex<EpisodeGraph>>,
    self_model: Arc<SelfModelManager>,
    abstractor: Arc<dyn Abstractor>,
    embedder: Arc<dyn Embedder>,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        graph: Arc<Mutex<EpisodeGraph>>,
        self_model: Arc<SelfModelManager>,
        abstractor: Arc<dyn Abstractor>,
        embedder: Arc<dyn Embedder>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            graph,
            self_model,
            abstractor,
            embedder,
            config,
        }
    }

    /// Run one full consolidation pass.
    ///
    /// A failed abstraction call aborts the mutation steps, but decay and
    /// the durable checkpoint always run.
    pub async fn run_pass(&self) -> Result<ConsolidationOutcome> {
        let now = chrono::Utc::now().timestamp();
        let mut outcome = ConsolidationOutcome::default();

        let raw = self.store.unprocessed_raw().await?;
        if raw.is_empty() {
            tracing::debug!("Consolidation: nothing to drain");
            self.decay_and_persist(now).await?;
            return Ok(outcome);
        }
        outcome.drained = raw.len();
        tracing::info!("Consolidating {} raw experience(s)", raw.len());

        let narrative = self.self_model.current().await.narrative;
        let reply = match self
            .abstractor
            .abstract_experiences(&raw, &narrative)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Abstraction call failed, pass aborted: {}", e);
                outcome.aborted = Some(e.to_string());
                self.decay_and_persist(now).await?;
                return Ok(outcome);
            }
        };

        // Embed every candidate before touching the graph lock.
        let mut embedded: Vec<(EpisodeCandidate, Embedding)> = Vec::new();
        for candidate in reply.episodes {
            if candidate.summary.trim().is_empty() {
                tracing::warn!("Skipping candidate with empty summary");
                continue;
            }
            match self.embedder.embed(&candidate.summary).await {
                Ok(embedding) => embedded.push((candidate, embedding)),
                Err(e) => tracing::warn!("Skipping candidate, embedding failed: {}", e),
            }
        }

        {
            let mut graph = self.graph.lock().await;
            for (candidate, embedding) in embedded {
                let nearest = graph.find_nearest(&embedding, 1).into_iter().next();
                match nearest {
                    Some((id, similarity)) if similarity >= self.config.merge_threshold => {
                        merge_candidate(&mut graph, &id, candidate, now);
                        outcome.merged += 1;
                    }
                    _ => {
                        insert_candidate(&mut graph, candidate, embedding, now);
                        outcome.inserted += 1;
                    }
                }
            }
        }

        let updates = reply.self_model_updates;
        self.self_model
            .update(|model| {
                if let Some(focus) = updates.current_focus.clone() {
                    model.current_focus = Some(focus);
                }
                if let Some(tendency) = &updates.new_tendency {
                    model.add_tendency(tendency);
                }
                if let Some(value) = &updates.new_value {
                    model.add_value(value);
                }
                if let Some(narrative) = updates.narrative_update.clone() {
                    model.narrative = narrative;
                }
            })
            .await?;

        let ids: Vec<String> = raw.iter().map(|r| r.id.clone()).collect();
        self.store.mark_processed(&ids).await?;

        self.decay_and_persist(now).await?;
        tracing::info!(
            "Consolidation done: {} drained, {} inserted, {} merged",
            outcome.drained,
            outcome.inserted,
            outcome.merged
        );
        Ok(outcome)
    }

    /// Steps 7-8: decay the whole graph, then checkpoint it durably.
    async fn decay_and_persist(&self, now: i64) -> Result<()> {
        let snapshot = {
            let mut graph = self.graph.lock().await;
            graph.apply_decay(
                now,
                self.config.half_life_days,
                self.config.minimum_salience,
                self.config.minimum_link_strength,
            );
            graph.clone()
        };
        hydrator::persist(&snapshot, &self.store).await
    }
}

/// Absorb a candidate into an existing near-duplicate node.
fn merge_candidate(graph: &mut EpisodeGraph, id: &str, candidate: EpisodeCandidate, now: i64) {
    graph.reinforce(id, now);
    let Some(node) = graph.node_mut(id) else { return };

    node.summary.push_str("\n\n");
    node.summary.push_str(&candidate.summary);
    node.salience = node.salience.max(candidate.salience.clamp(0.0, 1.0));
    node.exemplars
        .extend(candidate.exemplars.into_iter().map(|e| Exemplar {
            quote: e.quote,
            context: e.significance,
            timestamp: now,
        }));
    if node.exemplars.len() > MAX_EXEMPLARS {
        let excess = node.exemplars.len() - MAX_EXEMPLARS;
        node.exemplars.drain(..excess);
    }
    for topic in candidate.topics {
        if !node.topics.iter().any(|t| t.eq_ignore_ascii_case(&topic)) {
            node.topics.push(topic);
        }
    }
    for link in &mut node.links {
        link.strength = (link.strength + MERGE_LINK_BOOST).min(1.0);
    }
    tracing::debug!("Merged candidate into episode {}", id);
}

/// Insert a candidate as a new node, linked thematically to its nearest
/// existing neighbours.
fn insert_candidate(
    graph: &mut EpisodeGraph,
    candidate: EpisodeCandidate,
    embedding: Embedding,
    now: i64,
) {
    let neighbours: Vec<String> = graph
        .find_nearest(&embedding, INSERT_LINK_FANOUT)
        .into_iter()
        .filter(|(_, similarity)| *similarity > 0.0)
        .map(|(id, _)| id)
        .collect();

    let mut episode = Episode::new(candidate.summary, embedding, now);
    episode.salience = candidate.salience.clamp(0.0, 1.0);
    episode.confidence = candidate.confidence.clamp(0.0, 1.0);
    episode.topics = candidate.topics;
    episode.patterns = candidate.patterns;
    episode.exemplars = candidate
        .exemplars
        .into_iter()
        .map(|e| Exemplar {
            quote: e.quote,
            context: e.significance,
            timestamp: now,
        })
        .collect();
    for target in neighbours {
        episode.links.push(EpisodeLink {
            target,
            strength: INSERT_LINK_STRENGTH,
            kind: LinkKind::Thematic,
        });
    }
    tracing::debug!("Inserted episode {} ({} links)", episode.id, episode.links.len());
    graph.add_node(episode);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use reveries_core::{ExperienceKind, ExperienceMetadata};
    use std::collections::HashMap;

    /// Embedder that maps known texts to fixed vectors.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        fallback: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| self.fallback.clone()))
        }
    }

    struct ScriptedAbstractor {
        reply: Result<AbstractionReply>,
    }

    #[async_trait]
    impl Abstractor for ScriptedAbstractor {
        async fn abstract_experiences(
            &self,
            _experiences: &[RawExperience],
            _narrative: &str,
        ) -> Result<AbstractionReply> {
            match &self.reply {
                Ok(r) => Ok(r.clone()),
                Err(e) => anyhow::bail!("{}", e),
            }
        }
    }

    fn candidate(summary: &str, salience: f32) -> EpisodeCandidate {
        EpisodeCandidate {
            summary: summary.to_string(),
            topics: vec!["test".into()],
            salience,
            confidence: 0.8,
            exemplars: vec![ExemplarCandidate {
                quote: "verbatim words".into(),
                significance: "why it mattered".into(),
            }],
            patterns: vec![],
        }
    }

    async fn engine_with(
        store: Arc<SqliteStore>,
        graph: Arc<Mutex<EpisodeGraph>>,
        reply: Result<AbstractionReply>,
        table: HashMap<String, Vec<f32>>,
    ) -> ConsolidationEngine {
        let self_model = Arc::new(SelfModelManager::load_or_create(store.clone()).await.unwrap());
        ConsolidationEngine::new(
            store,
            graph,
            self_model,
            Arc::new(ScriptedAbstractor { reply }),
            Arc::new(TableEmbedder {
                table,
                fallback: vec![0.0, 1.0, 0.0],
            }),
            ConsolidationConfig::default(),
        )
    }

    async fn seed_raw(store: &SqliteStore, n: usize) {
        for i in 0..n {
            let exp = RawExperience::new(
                ExperienceKind::Conversation,
                i as i64,
                format!("exchange {}", i),
                vec![0.5, 0.5, 0.0],
                0.4,
                ExperienceMetadata::default(),
            );
            store.insert_raw(&exp).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_insert_into_empty_graph() {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        seed_raw(&store, 3).await;
        let graph = Arc::new(Mutex::new(EpisodeGraph::new()));

        let reply = AbstractionReply {
            episodes: vec![candidate("They talked about the garden.", 0.6)],
            self_model_updates: SelfModelUpdates::default(),
        };
        let engine = engine_with(store.clone(), graph.clone(), Ok(reply), HashMap::new()).await;

        let outcome = engine.run_pass().await.unwrap();
        assert_eq!(outcome.drained, 3);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.merged, 0);
        assert_eq!(graph.lock().await.node_count(), 1);

        // All raw experiences flagged processed, graph persisted.
        let (_, unprocessed) = store.raw_counts().await.unwrap();
        assert_eq!(unprocessed, 0);
        assert_eq!(store.load_episodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_near_duplicate_merges() {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        seed_raw(&store, 1).await;

        let mut existing = Episode::new("They planted tomatoes.".into(), vec![1.0, 0.0, 0.0], 0);
        existing.id = "existing".into();
        existing.salience = 0.4;
        existing.links.push(EpisodeLink {
            target: "existing".into(),
            strength: 0.5,
            kind: LinkKind::Thematic,
        });
        let mut g = EpisodeGraph::new();
        g.add_node(existing);
        let graph = Arc::new(Mutex::new(g));

        let reply = AbstractionReply {
            episodes: vec![candidate("They watered the tomatoes.", 0.9)],
            self_model_updates: SelfModelUpdates::default(),
        };
        let table = HashMap::from([(
            "They watered the tomatoes.".to_string(),
            vec![0.995, 0.005, 0.0],
        )]);
        let engine = engine_with(store.clone(), graph.clone(), Ok(reply), table).await;

        let outcome = engine.run_pass().await.unwrap();
        assert_eq!(outcome.merged, 1);
        assert_eq!(outcome.inserted, 0);

        let g = graph.lock().await;
        assert_eq!(g.node_count(), 1);
        let node = g.node("existing").unwrap();
        assert_eq!(node.access_count, 1);
        assert!(node.summary.contains("They planted tomatoes."));
        assert!(node.summary.contains("They watered the tomatoes."));
        assert!((node.salience - 0.9).abs() < 1e-6);
        assert!((node.links[0].strength - 0.6).abs() < 1e-6); // +0.1 boost
        assert_eq!(node.exemplars.len(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_still_decays_and_persists() {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        seed_raw(&store, 2).await;

        let mut stale = Episode::new("Old memory.".into(), vec![1.0, 0.0, 0.0], 0);
        stale.id = "stale".into();
        stale.salience = 0.8;
        stale.last_accessed = 0;
        let mut g = EpisodeGraph::new();
        g.add_node(stale);
        let graph = Arc::new(Mutex::new(g));

        let engine = engine_with(
            store.clone(),
            graph.clone(),
            Err(anyhow::anyhow!("model timeout")),
            HashMap::new(),
        )
        .await;

        let outcome = engine.run_pass().await.unwrap();
        assert!(outcome.aborted.is_some());

        // Raw experiences stay unprocessed for the next tick.
        let (_, unprocessed) = store.raw_counts().await.unwrap();
        assert_eq!(unprocessed, 2);

        // But decay ran and the graph was checkpointed.
        let persisted = store.load_episodes().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(persisted[0].salience < 0.8);
    }

    #[tokio::test]
    async fn test_self_model_updates_applied() {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        seed_raw(&store, 1).await;
        let graph = Arc::new(Mutex::new(EpisodeGraph::new()));

        let reply = AbstractionReply {
            episodes: vec![],
            self_model_updates: SelfModelUpdates {
                current_focus: Some("the move to Portland".into()),
                new_tendency: Some("circles back to unfinished topics".into()),
                new_value: Some("steadiness".into()),
                narrative_update: Some("I am starting to remember.".into()),
            },
        };
        let engine = engine_with(store.clone(), graph, Ok(reply), HashMap::new()).await;
        engine.run_pass().await.unwrap();

        let model = store.load_self_model().await.unwrap().unwrap();
        assert_eq!(model.current_focus.as_deref(), Some("the move to Portland"));
        assert_eq!(model.values, vec!["steadiness".to_string()]);
        assert_eq!(model.narrative, "I am starting to remember.");
    }

    #[tokio::test]
    async fn test_insert_links_to_nearest_neighbours() {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        seed_raw(&store, 1).await;

        let mut g = EpisodeGraph::new();
        for (id, emb) in [
            ("n1", vec![0.0, 1.0, 0.1]),
            ("n2", vec![0.1, 0.9, 0.0]),
            ("n3", vec![0.0, 0.8, 0.2]),
            ("n4", vec![0.0, 0.7, 0.3]),
        ] {
            let mut ep = Episode::new(format!("summary {}", id), emb, 0);
            ep.id = id.to_string();
            g.add_node(ep);
        }
        let graph = Arc::new(Mutex::new(g));

        // A direction below the merge threshold against every seeded node.
        let table = HashMap::from([(
            "Something new happened.".to_string(),
            vec![0.7, 0.5, 0.0],
        )]);
        let reply = AbstractionReply {
            episodes: vec![candidate("Something new happened.", 0.5)],
            self_model_updates: SelfModelUpdates::default(),
        };
        let engine = engine_with(store, graph.clone(), Ok(reply), table).await;
        let outcome = engine.run_pass().await.unwrap();
        assert_eq!(outcome.inserted, 1);

        let g = graph.lock().await;
        assert_eq!(g.node_count(), 5);
        let new_node = g.nodes().find(|n| !n.id.starts_with('n')).unwrap();
        assert_eq!(new_node.links.len(), 3);
        assert!(new_node
            .links
            .iter()
            .all(|l| l.kind == LinkKind::Thematic && (l.strength - 0.5).abs() < 1e-6));
    }
}
