//! Property-based tests for the episode graph.
//!
//! Uses proptest to verify invariants that must hold for ALL possible
//! inputs, not just hand-picked examples.

use proptest::prelude::*;
use reveries_core::{Episode, EpisodeLink, LinkKind};
use reveries_memory::EpisodeGraph;
use std::collections::HashMap;

const DAY: i64 = 86_400;

fn arb_embedding() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..=1.0, 4)
}

/// A small random graph: up to 8 nodes, random links among them.
fn arb_graph() -> impl Strategy<Value = EpisodeGraph> {
    let node = (arb_embedding(), 0.1f32..=1.0, 0i64..100 * DAY);
    prop::collection::vec(node, 1..8).prop_flat_map(|nodes| {
        let n = nodes.len();
        let link = (0..n, 0..n, 0.05f32..=1.0);
        prop::collection::vec(link, 0..12).prop_map(move |links| {
            let mut graph = EpisodeGraph::new();
            for (i, (embedding, salience, last_accessed)) in nodes.iter().enumerate() {
                let mut ep = Episode::new(format!("summary {}", i), embedding.clone(), 0);
                ep.id = format!("n{}", i);
                ep.salience = *salience;
                ep.last_accessed = *last_accessed;
                graph.add_node(ep);
            }
            for (from, to, strength) in &links {
                graph.add_link(
                    &format!("n{}", from),
                    EpisodeLink {
                        target: format!("n{}", to),
                        strength: *strength,
                        kind: LinkKind::Thematic,
                    },
                );
            }
            graph
        })
    })
}

proptest! {
    /// Decay never increases any salience or link strength, and everything
    /// stays at or above the configured floors.
    #[test]
    fn decay_is_monotone_and_floored(
        mut graph in arb_graph(),
        now in 0i64..200 * DAY,
        half_life in 1.0f64..90.0,
    ) {
        let before: HashMap<String, (f32, Vec<f32>)> = graph
            .nodes()
            .map(|n| (
                n.id.clone(),
                (n.salience, n.links.iter().map(|l| l.strength).collect()),
            ))
            .collect();

        graph.apply_decay(now, half_life, 0.1, 0.05);

        for node in graph.nodes() {
            let (old_salience, old_strengths) = &before[&node.id];
            prop_assert!(node.salience <= *old_salience + 1e-6);
            prop_assert!(node.salience >= 0.1);
            for (link, old) in node.links.iter().zip(old_strengths) {
                prop_assert!(link.strength <= *old + 1e-6);
                prop_assert!(link.strength >= 0.05);
            }
        }
    }

    /// Running decay twice at the same instant never increases anything.
    #[test]
    fn decay_twice_is_non_increasing(
        mut graph in arb_graph(),
        now in 0i64..200 * DAY,
    ) {
        graph.apply_decay(now, 30.0, 0.1, 0.05);
        let mid: HashMap<String, f32> =
            graph.nodes().map(|n| (n.id.clone(), n.salience)).collect();
        graph.apply_decay(now, 30.0, 0.1, 0.05);
        for node in graph.nodes() {
            prop_assert!(node.salience <= mid[&node.id] + 1e-6);
        }
    }

    /// Reinforce never decreases access count or last-accessed.
    #[test]
    fn reinforce_is_monotone(mut graph in arb_graph(), now in 0i64..200 * DAY) {
        let before: HashMap<String, (u32, i64)> = graph
            .nodes()
            .map(|n| (n.id.clone(), (n.access_count, n.last_accessed)))
            .collect();

        let ids: Vec<String> = graph.nodes().map(|n| n.id.clone()).collect();
        for id in &ids {
            graph.reinforce(id, now);
        }
        for node in graph.nodes() {
            let (count, accessed) = before[&node.id];
            prop_assert!(node.access_count >= count);
            prop_assert!(node.last_accessed >= accessed);
        }
    }

    /// Two disjoint seeds feeding a common target activate it at least as
    /// much as either seed alone.
    #[test]
    fn activation_is_additive(
        graph in arb_graph(),
        e1 in 0.1f32..=1.0,
        e2 in 0.1f32..=1.0,
    ) {
        let ids: Vec<String> = graph.nodes().map(|n| n.id.clone()).collect();
        prop_assume!(ids.len() >= 2);
        let s1 = ids[0].clone();
        let s2 = ids[1].clone();

        let both = graph.spread_activation(
            &HashMap::from([(s1.clone(), e1), (s2.clone(), e2)]),
            3,
            0.5,
        );
        let alone1 = graph.spread_activation(&HashMap::from([(s1.clone(), e1)]), 3, 0.5);
        let alone2 = graph.spread_activation(&HashMap::from([(s2.clone(), e2)]), 3, 0.5);

        for (id, energy) in &both {
            let from1 = alone1.get(id).copied().unwrap_or(0.0);
            let from2 = alone2.get(id).copied().unwrap_or(0.0);
            prop_assert!(*energy >= from1.max(from2) - 1e-4);
        }
    }
}

/// Retrieval locality on a concrete chain: every node reachable within the
/// hop limit appears with at least seed * (s * d)^hops energy.
#[test]
fn activation_respects_locality_bound() {
    let mut graph = EpisodeGraph::new();
    for i in 0..4 {
        let mut ep = Episode::new(format!("summary {}", i), vec![1.0], 0);
        ep.id = format!("n{}", i);
        graph.add_node(ep);
    }
    let strength = 0.7f32;
    for i in 0..3 {
        graph.add_link(
            &format!("n{}", i),
            EpisodeLink {
                target: format!("n{}", i + 1),
                strength,
                kind: LinkKind::Causal,
            },
        );
    }

    let seed_energy = 1.0f32;
    let decay = 0.5f32;
    let hops = 3u32;
    let activation = graph.spread_activation(
        &HashMap::from([("n0".to_string(), seed_energy)]),
        hops,
        decay,
    );

    for (distance, id) in [(1, "n1"), (2, "n2"), (3, "n3")] {
        let bound = seed_energy * (strength * decay).powi(distance);
        assert!(
            activation[id] >= bound - 1e-6,
            "{} activated at {} but bound is {}",
            id,
            activation[id],
            bound
        );
    }
}
