//! Stable handle types for graph entities.
//!
//! Nodes live in an arena owned by their [`Graph`](crate::graph::Graph); every
//! other part of the crate refers to them through these copyable handles.
//! Each handle carries the [`GraphId`] of the graph that issued it, so a
//! handle from one graph can never silently address a node in another.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identity of a graph instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Generates a fresh random identity.
    pub fn new() -> Self {
        GraphId(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

/// Node handle: the issuing graph, the node's arena slot, and the
/// generation the slot had when the node was created.
///
/// Arena slots are reused after a removal. The generation tells a handle to
/// the removed node apart from the node that later took its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub graph: GraphId,
    pub index: u32,
    #[serde(default)]
    pub generation: u32,
}

impl NodeId {
    pub(crate) fn new(graph: GraphId, idx: NodeIndex<u32>, generation: u32) -> Self {
        NodeId {
            graph,
            index: idx.index() as u32,
            generation,
        }
    }

    /// The arena slot of this node as a petgraph index.
    pub fn slot(&self) -> NodeIndex<u32> {
        NodeIndex::new(self.index as usize)
    }

    /// Handle of the input at `port` on this node.
    pub fn input(self, port: u16) -> InputId {
        InputId { node: self, port }
    }

    /// Handle of the output at `port` on this node.
    pub fn output(self, port: u16) -> OutputId {
        OutputId { node: self, port }
    }
}

/// Input port handle: owning node plus positional port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputId {
    pub node: NodeId,
    pub port: u16,
}

/// Output port handle: owning node plus positional port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputId {
    pub node: NodeId,
    pub port: u16,
}

// Display implementations. Graph ids are shortened to the first uuid group,
// which is plenty to tell graphs apart in log lines.

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.in{}", self.node, self.port)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.out{}", self.node, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_slot_roundtrip() {
        let graph = GraphId::new();
        let idx = NodeIndex::<u32>::new(42);
        let node = NodeId::new(graph, idx, 3);
        assert_eq!(node.index, 42);
        assert_eq!(node.generation, 3);
        assert_eq!(node.slot().index(), 42);
        assert_eq!(node.graph, graph);
    }

    #[test]
    fn graph_ids_are_unique() {
        assert_ne!(GraphId::new(), GraphId::new());
    }

    #[test]
    fn port_handles_display() {
        let node = NodeId {
            graph: GraphId::new(),
            index: 7,
            generation: 0,
        };
        assert_eq!(format!("{}", node), "7");
        assert_eq!(format!("{}", node.input(2)), "7.in2");
        assert_eq!(format!("{}", node.output(0)), "7.out0");
    }

    #[test]
    fn graph_id_display_is_short() {
        let id = GraphId::new();
        assert_eq!(format!("{}", id).len(), 8);
    }

    #[test]
    fn same_slot_in_different_graphs_differs() {
        let a = NodeId {
            graph: GraphId::new(),
            index: 1,
            generation: 0,
        };
        let b = NodeId {
            graph: GraphId::new(),
            index: 1,
            generation: 0,
        };
        assert_ne!(a, b);
        assert_ne!(a.output(0), b.output(0));
    }

    #[test]
    fn same_slot_in_later_generation_differs() {
        let graph = GraphId::new();
        let old = NodeId::new(graph, NodeIndex::new(0), 0);
        let new = NodeId::new(graph, NodeIndex::new(0), 1);
        assert_eq!(old.slot(), new.slot());
        assert_ne!(old, new);
    }

    #[test]
    fn serde_roundtrip() {
        let node = NodeId {
            graph: GraphId::new(),
            index: 3,
            generation: 0,
        };
        let out = node.output(1);
        let json = serde_json::to_string(&out).unwrap();
        let back: OutputId = serde_json::from_str(&json).unwrap();
        assert_eq!(out, back);
    }
}
