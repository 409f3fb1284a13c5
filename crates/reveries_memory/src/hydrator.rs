//! Round-trips the episode graph between memory and the store.

use crate::graph::EpisodeGraph;
use crate::store::SqliteStore;
use anyhow::Result;

/// Build the in-memory graph from every persisted episode.
///
/// Links whose target no longer resolves are dropped with a warning rather
/// than poisoning traversal.
pub async fn hydrate(store: &SqliteStore) -> Result<EpisodeGraph> {
    let episodes = store.load_episodes().await?;
    let known: std::collections::HashSet<String> =
        episodes.iter().map(|e| e.id.clone()).collect();

    let mut graph = EpisodeGraph::new();
    for mut ep in episodes {
        let before = ep.links.len();
        ep.links.retain(|l| known.contains(&l.target));
        let dropped = before - ep.links.len();
        if dropped > 0 {
            tracing::warn!(
                "Dropped {} dangling link(s) from episode {}",
                dropped,
                ep.id
            );
        }
        graph.add_node(ep);
    }
    Ok(graph)
}

/// Snapshot the graph into the store.
///
/// Delegates to the store's two-pass transactional upsert so a crash can
/// never leave half a graph behind.
pub async fn persist(graph: &EpisodeGraph, store: &SqliteStore) -> Result<()> {
    let episodes: Vec<_> = graph.nodes().cloned().collect();
    store.save_episodes(&episodes).await
}
