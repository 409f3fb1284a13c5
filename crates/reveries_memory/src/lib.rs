//! Memory engine: durable store, episode graph, retrieval, consolidation.

pub mod consolidation;
pub mod embedding;
pub mod encoder;
pub mod gaps;
pub mod graph;
pub mod hydrator;
pub mod retrieval;
pub mod self_model;
pub mod store;

pub use consolidation::{
    AbstractionReply, Abstractor, ConsolidationConfig, ConsolidationEngine, ConsolidationOutcome,
    EpisodeCandidate, ExemplarCandidate, SelfModelUpdates,
};
pub use embedding::{cosine_similarity, Embedder, Embedding};
pub use encoder::{encode, initial_salience};
pub use gaps::GapTracker;
pub use graph::EpisodeGraph;
pub use hydrator::{hydrate, persist};
pub use retrieval::{retrieve, RetrievalParams};
pub use self_model::SelfModelManager;
pub use store::SqliteStore;
