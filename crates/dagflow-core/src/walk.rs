//! Collecting the neighbourhood of nodes.
//!
//! A [`Walker`] starts from seed nodes and follows connections upstream and
//! downstream, recording for each node reached its signed distance from the
//! nearest seed (negative upstream, positive downstream). The resulting
//! [`Subgraph`] also lists the inputs and outputs at its border, which is
//! what a caller needs to present or re-wire the region.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{InputId, NodeId, OutputId};

/// Limits of a walk. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Walker {
    pub max_upstream: Option<usize>,
    pub max_downstream: Option<usize>,
    /// Also branch sideways: follow downstream links of upstream nodes and
    /// upstream links of downstream nodes.
    pub full: bool,
}

/// Nodes reached by a [`Walker`] and the ports on the border.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Subgraph {
    /// Reached nodes with their depth, sorted by depth then arena slot.
    pub nodes: Vec<(NodeId, i32)>,
    /// Connections with both ends inside.
    pub edges: Vec<(OutputId, InputId)>,
    /// Inputs inside that are unconnected or fed from outside.
    pub open_inputs: Vec<InputId>,
    /// Outputs inside that feed nothing inside.
    pub open_outputs: Vec<OutputId>,
}

impl Subgraph {
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.iter().any(|(id, _)| *id == node)
    }

    pub fn depth(&self, node: NodeId) -> Option<i32> {
        self.nodes.iter().find(|(id, _)| *id == node).map(|(_, d)| *d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heading {
    Up,
    Down,
    Both,
}

impl Walker {
    /// Walks only upstream, at most `depth` steps.
    pub fn upstream(depth: usize) -> Self {
        Walker {
            max_upstream: Some(depth),
            max_downstream: Some(0),
            full: false,
        }
    }

    /// Walks only downstream, at most `depth` steps.
    pub fn downstream(depth: usize) -> Self {
        Walker {
            max_upstream: Some(0),
            max_downstream: Some(depth),
            full: false,
        }
    }

    pub fn walk(&self, graph: &Graph, seeds: &[NodeId]) -> Result<Subgraph, GraphError> {
        let mut depths: HashMap<NodeIndex<u32>, i32> = HashMap::new();
        let mut queue = VecDeque::new();
        for &seed in seeds {
            let idx = graph.slot(seed)?;
            if depths.insert(idx, 0).is_none() {
                queue.push_back((idx, 0, Heading::Both));
            }
        }

        while let Some((idx, depth, heading)) = queue.pop_front() {
            if matches!(heading, Heading::Up | Heading::Both) && self.allows(depth - 1) {
                let next = if self.full { Heading::Both } else { Heading::Up };
                for producer in graph.nodes.neighbors_directed(idx, Direction::Incoming) {
                    if !depths.contains_key(&producer) {
                        depths.insert(producer, depth - 1);
                        queue.push_back((producer, depth - 1, next));
                    }
                }
            }
            if matches!(heading, Heading::Down | Heading::Both) && self.allows(depth + 1) {
                let next = if self.full { Heading::Both } else { Heading::Down };
                for consumer in graph.nodes.neighbors_directed(idx, Direction::Outgoing) {
                    if !depths.contains_key(&consumer) {
                        depths.insert(consumer, depth + 1);
                        queue.push_back((consumer, depth + 1, next));
                    }
                }
            }
        }

        Ok(border(graph, depths))
    }

    fn allows(&self, depth: i32) -> bool {
        let within = |limit: Option<usize>, steps: i32| match limit {
            Some(max) => steps as usize <= max,
            None => true,
        };
        if depth < 0 {
            within(self.max_upstream, -depth)
        } else {
            within(self.max_downstream, depth)
        }
    }
}

fn border(graph: &Graph, depths: HashMap<NodeIndex<u32>, i32>) -> Subgraph {
    let inside: HashSet<NodeIndex<u32>> = depths.keys().copied().collect();
    let mut sub = Subgraph::default();

    let mut reached: Vec<(NodeIndex<u32>, i32)> = depths.into_iter().collect();
    reached.sort_by_key(|&(idx, depth)| (depth, idx));

    for &(idx, depth) in &reached {
        let node = &graph.nodes[idx];
        let id = node.id();
        sub.nodes.push((id, depth));

        for (port, input) in (0..=u16::MAX).zip(node.inputs()) {
            let inner = input
                .source()
                .is_some_and(|source| inside.contains(&source.node.slot()));
            if let (true, Some(source)) = (inner, input.source()) {
                sub.edges.push((source, id.input(port)));
            } else {
                sub.open_inputs.push(id.input(port));
            }
        }

        for port in (0..=u16::MAX).take(node.output_count()) {
            let feeds_inside = graph
                .nodes
                .edges_directed(idx, Direction::Outgoing)
                .any(|edge| edge.weight().output == port && inside.contains(&edge.target()));
            if !feeds_inside {
                sub.open_outputs.push(id.output(port));
            }
        }
    }
    sub
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Add, Scale, Source};

    /// a -> b -> c -> d, plus e -> sum <- c
    fn chain() -> (Graph, Vec<NodeId>) {
        let mut g = Graph::open("chain");
        let a = g.create_node("a", Source::new(vec![1.0])).unwrap();
        let b = g.create_node("b", Scale { factor: 1.0 }).unwrap();
        let c = g.create_node("c", Scale { factor: 1.0 }).unwrap();
        let d = g.create_node("d", Scale { factor: 1.0 }).unwrap();
        let e = g.create_node("e", Source::new(vec![1.0])).unwrap();
        let sum = g.create_node("sum", Add).unwrap();
        g.connect_to(a.output(0), b).unwrap();
        g.connect_to(b.output(0), c).unwrap();
        g.connect_to(c.output(0), d).unwrap();
        g.connect_nodes(&[c, e], sum).unwrap();
        (g, vec![a, b, c, d, e, sum])
    }

    #[test]
    fn depths_are_signed() {
        let (g, n) = chain();
        let sub = Walker::default().walk(&g, &[n[2]]).unwrap();
        assert_eq!(sub.depth(n[0]), Some(-2));
        assert_eq!(sub.depth(n[1]), Some(-1));
        assert_eq!(sub.depth(n[2]), Some(0));
        assert_eq!(sub.depth(n[3]), Some(1));
        assert_eq!(sub.depth(n[5]), Some(1));
        // e only feeds a downstream node; a plain walk does not branch to it.
        assert!(!sub.contains(n[4]));
    }

    #[test]
    fn full_walk_branches_sideways() {
        let (g, n) = chain();
        let walker = Walker {
            full: true,
            ..Walker::default()
        };
        let sub = walker.walk(&g, &[n[2]]).unwrap();
        assert_eq!(sub.depth(n[4]), Some(0));
        assert_eq!(sub.nodes.len(), 6);
        assert!(sub.open_inputs.is_empty());
    }

    #[test]
    fn limited_walk_reports_border() {
        let (g, n) = chain();
        let sub = Walker::upstream(1).walk(&g, &[n[2]]).unwrap();
        assert_eq!(sub.nodes, vec![(n[1], -1), (n[2], 0)]);
        assert_eq!(sub.edges, vec![(n[1].output(0), n[2].input(0))]);
        // b reads from a, which is outside.
        assert_eq!(sub.open_inputs, vec![n[1].input(0)]);
        // c feeds d and sum, both outside.
        assert_eq!(sub.open_outputs, vec![n[2].output(0)]);
    }

    #[test]
    fn downstream_only() {
        let (g, n) = chain();
        let sub = Walker::downstream(1).walk(&g, &[n[1]]).unwrap();
        assert_eq!(sub.nodes, vec![(n[1], 0), (n[2], 1)]);
    }
}
