//! In-memory directed weighted graph of episodes.
//!
//! The graph owns every node; edges refer to targets by id only. Thematic
//! cycles are expected. Retrieval seeds activation at the nodes nearest a
//! query embedding and spreads it along weighted edges so that an episode
//! weakly similar to the query but strongly linked to activated ones still
//! surfaces.

use crate::embedding::cosine_similarity;
use reveries_core::time::days_since;
use reveries_core::{Episode, EpisodeLink};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct EpisodeGraph {
    nodes: HashMap<String, Episode>,
}

impl EpisodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, episode: Episode) {
        self.nodes.insert(episode.id.clone(), episode);
    }

    pub fn node(&self, id: &str) -> Option<&Episode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Episode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Episode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.nodes.values().map(|n| n.links.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add an outgoing link from `from`. Unknown sources are ignored with a
    /// warning; the target may not exist yet (consolidation inserts in
    /// batches) and is checked at traversal time instead.
    pub fn add_link(&mut self, from: &str, link: EpisodeLink) {
        match self.nodes.get_mut(from) {
            Some(node) => node.links.push(link),
            None => tracing::warn!("add_link from unknown node {}", from),
        }
    }

    pub fn out_links(&self, id: &str) -> &[EpisodeLink] {
        self.nodes.get(id).map(|n| n.links.as_slice()).unwrap_or(&[])
    }

    /// The `k` nodes most similar to `query` by cosine, ties broken by
    /// higher salience then lexicographic id. Linear scan over all nodes.
    pub fn find_nearest(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(&Episode, f32)> = self
            .nodes
            .values()
            .map(|n| (n, cosine_similarity(query, &n.embedding)))
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.salience
                        .partial_cmp(&a.salience)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(n, s)| (n.id.clone(), s))
            .collect()
    }

    /// Spread activation outward from `seeds` for up to `max_hops` hops.
    ///
    /// Each hop, every frontier node pushes `energy * strength * decay_per_hop`
    /// along each outgoing edge; contributions accumulate additively, so nodes
    /// reached by multiple paths end up hotter. Seeds re-enter later frontiers
    /// only if an edge leads back to them.
    pub fn spread_activation(
        &self,
        seeds: &HashMap<String, f32>,
        max_hops: u32,
        decay_per_hop: f32,
    ) -> HashMap<String, f32> {
        let mut activation = seeds.clone();
        let mut frontier = seeds.clone();

        for _ in 0..max_hops {
            let mut next: HashMap<String, f32> = HashMap::new();
            for (id, energy) in &frontier {
                for link in self.out_links(id) {
                    if !self.nodes.contains_key(&link.target) {
                        continue;
                    }
                    *next.entry(link.target.clone()).or_insert(0.0) +=
                        energy * link.strength * decay_per_hop;
                }
            }
            if next.is_empty() {
                break;
            }
            for (id, energy) in &next {
                *activation.entry(id.clone()).or_insert(0.0) += energy;
            }
            frontier = next;
        }

        activation
    }

    /// Record an access: bump the count, refresh last-accessed.
    pub fn reinforce(&mut self, id: &str, now: i64) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.access_count = node.access_count.saturating_add(1);
            node.last_accessed = node.last_accessed.max(now);
        }
    }

    /// Exponential decay of salience and link strengths by time since last
    /// access, floored at the configured minimums. Monotonically
    /// non-increasing, so re-running within the same tick is safe.
    pub fn apply_decay(
        &mut self,
        now: i64,
        half_life_days: f64,
        minimum_salience: f32,
        minimum_link_strength: f32,
    ) {
        if half_life_days <= 0.0 {
            return;
        }
        for node in self.nodes.values_mut() {
            let d = days_since(node.last_accessed, now);
            let factor = 0.5f64.powf(d / half_life_days) as f32;
            node.salience = (node.salience * factor).max(minimum_salience);
            for link in &mut node.links {
                link.strength = (link.strength * factor).max(minimum_link_strength);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reveries_core::LinkKind;

    const DAY: i64 = 86_400;

    fn node(id: &str, embedding: Vec<f32>, salience: f32) -> Episode {
        let mut ep = Episode::new(format!("summary {}", id), embedding, 0);
        ep.id = id.to_string();
        ep.salience = salience;
        ep
    }

    fn link(target: &str, strength: f32) -> EpisodeLink {
        EpisodeLink {
            target: target.to_string(),
            strength,
            kind: LinkKind::Thematic,
        }
    }

    #[test]
    fn test_find_nearest_orders_by_similarity() {
        let mut g = EpisodeGraph::new();
        g.add_node(node("a", vec![1.0, 0.0], 0.5));
        g.add_node(node("b", vec![0.0, 1.0], 0.5));
        g.add_node(node("c", vec![0.9, 0.1], 0.5));

        let nearest = g.find_nearest(&[1.0, 0.0], 2);
        assert_eq!(nearest[0].0, "a");
        assert_eq!(nearest[1].0, "c");
    }

    #[test]
    fn test_find_nearest_ties_break_on_salience_then_id() {
        let mut g = EpisodeGraph::new();
        g.add_node(node("b", vec![1.0, 0.0], 0.9));
        g.add_node(node("a", vec![1.0, 0.0], 0.5));
        g.add_node(node("c", vec![1.0, 0.0], 0.9));

        let nearest = g.find_nearest(&[1.0, 0.0], 3);
        let ids: Vec<&str> = nearest.iter().map(|(id, _)| id.as_str()).collect();
        // Equal cosine: higher salience first, then lexicographic id.
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_spread_reaches_neighbors_with_decayed_energy() {
        let mut g = EpisodeGraph::new();
        g.add_node(node("x", vec![1.0], 0.5));
        g.add_node(node("y", vec![1.0], 0.5));
        g.add_link("x", link("y", 0.8));

        let seeds = HashMap::from([("x".to_string(), 1.0f32)]);
        let activation = g.spread_activation(&seeds, 2, 0.5);

        assert_eq!(activation["x"], 1.0);
        assert!((activation["y"] - 0.4).abs() < 1e-6); // 1.0 * 0.8 * 0.5
    }

    #[test]
    fn test_spread_accumulates_across_paths() {
        let mut g = EpisodeGraph::new();
        for id in ["a", "b", "t"] {
            g.add_node(node(id, vec![1.0], 0.5));
        }
        g.add_link("a", link("t", 0.5));
        g.add_link("b", link("t", 0.5));

        let both = g.spread_activation(
            &HashMap::from([("a".to_string(), 1.0), ("b".to_string(), 1.0)]),
            1,
            0.5,
        );
        let alone = g.spread_activation(&HashMap::from([("a".to_string(), 1.0)]), 1, 0.5);

        assert!(both["t"] >= alone["t"]);
        assert!((both["t"] - 0.5).abs() < 1e-6); // 0.25 from each path
    }

    #[test]
    fn test_spread_skips_dangling_targets() {
        let mut g = EpisodeGraph::new();
        g.add_node(node("x", vec![1.0], 0.5));
        g.add_link("x", link("gone", 0.9));

        let activation = g.spread_activation(&HashMap::from([("x".to_string(), 1.0)]), 3, 0.5);
        assert_eq!(activation.len(), 1);
    }

    #[test]
    fn test_spread_chain_energy_floor() {
        // x -> y -> z with strengths 0.8, 0.6: z gets 1.0 * 0.8*0.5 * 0.6*0.5
        let mut g = EpisodeGraph::new();
        for id in ["x", "y", "z"] {
            g.add_node(node(id, vec![1.0], 0.5));
        }
        g.add_link("x", link("y", 0.8));
        g.add_link("y", link("z", 0.6));

        let activation = g.spread_activation(&HashMap::from([("x".to_string(), 1.0)]), 2, 0.5);
        assert!((activation["z"] - 0.12).abs() < 1e-6);
    }

    #[test]
    fn test_reinforce_bumps_count_and_timestamp() {
        let mut g = EpisodeGraph::new();
        g.add_node(node("a", vec![1.0], 0.5));
        g.reinforce("a", 500);
        g.reinforce("a", 400); // older timestamp never rewinds last_accessed

        let n = g.node("a").unwrap();
        assert_eq!(n.access_count, 2);
        assert_eq!(n.last_accessed, 500);
    }

    #[test]
    fn test_decay_halves_at_half_life() {
        let mut g = EpisodeGraph::new();
        let mut n = node("a", vec![1.0], 0.8);
        n.last_accessed = 0;
        n.links.push(link("a", 0.8));
        g.add_node(n);

        g.apply_decay(30 * DAY, 30.0, 0.1, 0.05);
        let n = g.node("a").unwrap();
        assert!((n.salience - 0.4).abs() < 1e-4);
        assert!((n.links[0].strength - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_decay_floors() {
        let mut g = EpisodeGraph::new();
        let mut n = node("a", vec![1.0], 0.3);
        n.last_accessed = 0;
        n.links.push(link("a", 0.2));
        g.add_node(n);

        g.apply_decay(3650 * DAY, 30.0, 0.1, 0.05);
        let n = g.node("a").unwrap();
        assert_eq!(n.salience, 0.1);
        assert_eq!(n.links[0].strength, 0.05);
    }

    #[test]
    fn test_decay_ignores_clock_rewind() {
        let mut g = EpisodeGraph::new();
        let mut n = node("a", vec![1.0], 0.8);
        n.last_accessed = 100 * DAY;
        g.add_node(n);

        // "now" before last access: duration clamps to zero, nothing decays.
        g.apply_decay(50 * DAY, 30.0, 0.1, 0.05);
        assert_eq!(g.node("a").unwrap().salience, 0.8);
    }
}
