//! Graph: the arena that owns every node of a dataflow program.
//!
//! [`Graph`] is the single entry point for building and querying a graph.
//! Nodes live in a `StableGraph` whose edges run producer -> consumer and
//! carry the port indices of the connection ([`Link`]). Inputs additionally
//! store the [`OutputId`] they read from, so both directions of a connection
//! are available without scanning.
//!
//! Lifecycle: a graph starts [`GraphState::Open`]. Once [`Graph::close`]
//! succeeds it is [`GraphState::Closed`]: structure is frozen and values can
//! be pulled. A failed close leaves it [`GraphState::ClosingFailed`], which
//! still accepts mutations so the reported problems can be fixed.
//!
//! Closing lives in `close.rs`, evaluation in `eval.rs`; both extend
//! `Graph` with further `impl` blocks.

use std::fmt;

use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::config::{GraphConfig, Verbosity};
use crate::error::GraphError;
use crate::id::{GraphId, InputId, NodeId, OutputId};
use crate::node::{Kernel, Node};
use crate::port::{Input, InputSpec, Output};

/// Lifecycle state of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphState {
    Open,
    Closed,
    ClosingFailed,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphState::Open => "open",
            GraphState::Closed => "closed",
            GraphState::ClosingFailed => "closing-failed",
        };
        f.write_str(s)
    }
}

/// Edge weight: which output of the producer feeds which input of the
/// consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub output: u16,
    pub input: u16,
}

/// A dataflow graph.
#[derive(Debug)]
pub struct Graph {
    pub(crate) id: GraphId,
    pub(crate) name: String,
    pub(crate) config: GraphConfig,
    pub(crate) state: GraphState,
    pub(crate) nodes: StableGraph<Node, Link, Directed, u32>,
    /// Removal count per arena slot, stamped into new handles.
    generations: Vec<u32>,
}

impl Graph {
    pub fn new(name: impl Into<String>, config: GraphConfig) -> Self {
        Graph {
            id: GraphId::new(),
            name: name.into(),
            config,
            state: GraphState::Open,
            nodes: StableGraph::new(),
            generations: Vec::new(),
        }
    }

    /// An open graph with the default [`GraphConfig`].
    pub fn open(name: impl Into<String>) -> Self {
        Self::new(name, GraphConfig::default())
    }

    /// Builds a graph inside `build` and closes it.
    ///
    /// If `build` or the close fails, the half-built graph is dropped and the
    /// error returned; no unclosed graph escapes.
    pub fn scoped<T, F>(
        name: impl Into<String>,
        config: GraphConfig,
        build: F,
    ) -> Result<(Graph, T), GraphError>
    where
        F: FnOnce(&mut Graph) -> Result<T, GraphError>,
    {
        let mut graph = Graph::new(name, config);
        let value = build(&mut graph)?;
        graph.close()?;
        Ok((graph, value))
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == GraphState::Closed
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Adds a node running `kernel`. Its ports come from [`Kernel::layout`].
    pub fn create_node<K: Kernel + 'static>(
        &mut self,
        name: impl Into<String>,
        kernel: K,
    ) -> Result<NodeId, GraphError> {
        self.create_boxed(name, Box::new(kernel))
    }

    /// [`Graph::create_node`] for an already boxed kernel.
    pub fn create_boxed(
        &mut self,
        name: impl Into<String>,
        kernel: Box<dyn Kernel>,
    ) -> Result<NodeId, GraphError> {
        self.check_open()?;
        let placeholder = NodeId {
            graph: self.id,
            index: u32::MAX,
            generation: 0,
        };
        let idx = self.nodes.add_node(Node::new(placeholder, name.into(), kernel));
        let generation = self.generations.get(idx.index()).copied().unwrap_or(0);
        let id = NodeId::new(self.id, idx, generation);
        if let Err(err) = self.nodes[idx].attach(id) {
            self.release(idx);
            return Err(err);
        }

        if self.config.logs(Verbosity::Debug) {
            let node = &self.nodes[idx];
            tracing::debug!(
                graph = %self.name,
                node = %node.name(),
                kind = node.kind(),
                id = %id,
                "node created"
            );
        }
        Ok(id)
    }

    /// Appends an input to `node`.
    pub fn add_input(
        &mut self,
        node: NodeId,
        spec: impl Into<InputSpec>,
    ) -> Result<InputId, GraphError> {
        self.check_open()?;
        let idx = self.slot(node)?;
        let port = self.nodes[idx].add_input(spec.into())?;
        Ok(node.input(port))
    }

    /// Appends an output to `node`.
    pub fn add_output(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
    ) -> Result<OutputId, GraphError> {
        self.check_open()?;
        let idx = self.slot(node)?;
        let port = self.nodes[idx].add_output(name.into())?;
        Ok(node.output(port))
    }

    /// Connects `output` to `input`.
    ///
    /// The input must be free; use [`Graph::rebind`] to replace an existing
    /// connection.
    pub fn connect(&mut self, output: OutputId, input: InputId) -> Result<(), GraphError> {
        self.validate_connection(output, input)?;
        if let Some(bound) = self.input_port(input)?.source() {
            let consumer = &self.nodes[input.node.slot()];
            return Err(GraphError::AlreadyConnected {
                node: consumer.name().to_string(),
                input: self.input_port(input)?.name().to_string(),
                bound_to: self.output_label(bound),
            });
        }
        self.link(output, input);
        Ok(())
    }

    /// Connects `output` to `input`, replacing whatever `input` was bound to.
    /// Returns the previous source.
    pub fn rebind(
        &mut self,
        output: OutputId,
        input: InputId,
    ) -> Result<Option<OutputId>, GraphError> {
        self.validate_connection(output, input)?;
        let previous = self.unlink(input);
        self.link(output, input);
        Ok(previous)
    }

    /// Unbinds `input`. Returns the output it was connected to.
    pub fn disconnect(&mut self, input: InputId) -> Result<Option<OutputId>, GraphError> {
        self.check_open()?;
        self.input_port(input)?;
        Ok(self.unlink(input))
    }

    /// Removes `node` from the graph.
    ///
    /// Fails while any output of the node feeds another node, so no input is
    /// left pointing at a vanished output. Connections into the node are
    /// dropped with it. Handles to the removed node fail with
    /// [`GraphError::NodeNotFound`] from then on, even after a later node
    /// takes over its arena slot.
    pub fn remove_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        self.check_open()?;
        let idx = self.slot(node)?;

        let mut consumers: Vec<String> = self
            .nodes
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| edge.target() != idx)
            .map(|edge| self.nodes[edge.target()].name().to_string())
            .collect();
        if !consumers.is_empty() {
            consumers.sort();
            consumers.dedup();
            return Err(GraphError::RemovalBlocked {
                node: self.nodes[idx].name().to_string(),
                consumers,
            });
        }

        if let Some(removed) = self.release(idx) {
            if self.config.logs(Verbosity::Debug) {
                tracing::debug!(graph = %self.name, node = %removed.name(), "node removed");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        let idx = self.slot(id)?;
        Ok(&self.nodes[idx])
    }

    /// Handle of the output called `name` on `node`.
    pub fn output(&self, node: NodeId, name: &str) -> Result<OutputId, GraphError> {
        let n = self.node(node)?;
        n.output_port(name)
            .map(|port| node.output(port))
            .ok_or_else(|| GraphError::PortNotFound {
                node: n.name().to_string(),
                port: name.to_string(),
            })
    }

    /// Handle of the input called `name` on `node`.
    pub fn input(&self, node: NodeId, name: &str) -> Result<InputId, GraphError> {
        let n = self.node(node)?;
        n.input_port(name)
            .map(|port| node.input(port))
            .ok_or_else(|| GraphError::PortNotFound {
                node: n.name().to_string(),
                port: name.to_string(),
            })
    }

    /// Handle of the output at position `port` on `node`.
    pub fn output_at(&self, node: NodeId, port: u16) -> Result<OutputId, GraphError> {
        let id = node.output(port);
        self.output_port(id)?;
        Ok(id)
    }

    /// Handle of the input at position `port` on `node`.
    pub fn input_at(&self, node: NodeId, port: u16) -> Result<InputId, GraphError> {
        let id = node.input(port);
        self.input_port(id)?;
        Ok(id)
    }

    /// The output addressed by `id`.
    pub fn output_port(&self, id: OutputId) -> Result<&Output, GraphError> {
        let node = self.node(id.node)?;
        node.output_at(id.port).ok_or_else(|| GraphError::PortNotFound {
            node: node.name().to_string(),
            port: format!("output #{}", id.port),
        })
    }

    /// The input addressed by `id`.
    pub fn input_port(&self, id: InputId) -> Result<&Input, GraphError> {
        let node = self.node(id.node)?;
        node.input_at(id.port).ok_or_else(|| GraphError::PortNotFound {
            node: node.name().to_string(),
            port: format!("input #{}", id.port),
        })
    }

    /// All nodes, in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.node_indices().map(move |idx| &self.nodes[idx])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.node_count()
    }

    /// Number of connections.
    pub fn edge_count(&self) -> usize {
        self.nodes.edge_count()
    }

    /// Inputs fed by `output`.
    pub fn consumers(&self, output: OutputId) -> Result<Vec<InputId>, GraphError> {
        self.output_port(output)?;
        let mut inputs: Vec<InputId> = self
            .nodes
            .edges_directed(output.node.slot(), Direction::Outgoing)
            .filter(|edge| edge.weight().output == output.port)
            .map(|edge| self.nodes[edge.target()].id().input(edge.weight().input))
            .collect();
        inputs.sort_by_key(|input| (input.node.index, input.port));
        Ok(inputs)
    }

    /// Number of compute calls `node` has made.
    pub fn calls(&self, node: NodeId) -> Result<u64, GraphError> {
        Ok(self.node(node)?.calls())
    }

    /// Zeroes every node's compute-call counter.
    pub fn reset_calls(&mut self) {
        for node in self.nodes.node_weights_mut() {
            node.reset_calls();
        }
    }

    // -----------------------------------------------------------------------
    // Crate-internal helpers
    // -----------------------------------------------------------------------

    pub(crate) fn check_open(&self) -> Result<(), GraphError> {
        if self.state == GraphState::Closed {
            return Err(GraphError::GraphClosed {
                graph: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Resolves a handle to its arena slot, rejecting handles of other graphs
    /// and of removed nodes.
    pub(crate) fn slot(&self, node: NodeId) -> Result<NodeIndex<u32>, GraphError> {
        if node.graph != self.id {
            return Err(GraphError::ForeignGraph {
                expected: self.id,
                found: node.graph,
            });
        }
        let idx = node.slot();
        match self.nodes.node_weight(idx) {
            Some(live) if live.id().generation == node.generation => Ok(idx),
            _ => Err(GraphError::NodeNotFound { id: node }),
        }
    }

    /// Frees an arena slot and advances its generation.
    fn release(&mut self, idx: NodeIndex<u32>) -> Option<Node> {
        let removed = self.nodes.remove_node(idx)?;
        let slot = idx.index();
        if self.generations.len() <= slot {
            self.generations.resize(slot + 1, 0);
        }
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        Some(removed)
    }

    /// `"node.output"` label for messages.
    pub(crate) fn output_label(&self, output: OutputId) -> String {
        match self.nodes.node_weight(output.node.slot()) {
            Some(node) => match node.output_at(output.port) {
                Some(port) => format!("{}.{}", node.name(), port.name()),
                None => format!("{}.#{}", node.name(), output.port),
            },
            None => output.to_string(),
        }
    }

    fn validate_connection(&self, output: OutputId, input: InputId) -> Result<(), GraphError> {
        self.check_open()?;
        self.output_port(output)?;
        self.input_port(input)?;
        self.check_acyclic(output, input.node)
    }

    /// With eager checks on, rejects an `output -> consumer` edge that would
    /// close a cycle.
    pub(crate) fn check_acyclic(&self, output: OutputId, consumer: NodeId) -> Result<(), GraphError> {
        if !self.config.eager_checks {
            return Ok(());
        }
        let target = self.slot(consumer)?;
        if has_path_connecting(&self.nodes, target, output.node.slot(), None) {
            return Err(GraphError::WouldCycle {
                from: self.output_label(output),
                to: self.nodes[target].name().to_string(),
            });
        }
        Ok(())
    }

    /// Adds the edge for an already validated connection and binds the input.
    fn link(&mut self, output: OutputId, input: InputId) {
        let edge = self.nodes.add_edge(
            output.node.slot(),
            input.node.slot(),
            Link {
                output: output.port,
                input: input.port,
            },
        );
        if let Some(port) = self.nodes[input.node.slot()].input_at_mut(input.port) {
            port.bind(output, edge);
        }

        if self.config.logs(Verbosity::Debug) {
            tracing::debug!(
                graph = %self.name,
                from = %self.output_label(output),
                to = %self.nodes[input.node.slot()].name(),
                input = input.port,
                "connected"
            );
        }
    }

    pub(crate) fn unlink(&mut self, input: InputId) -> Option<OutputId> {
        let port = self.nodes[input.node.slot()].input_at_mut(input.port)?;
        let previous = port.source();
        if let Some(edge) = port.unbind() {
            self.nodes.remove_edge(edge);
        }
        previous
    }
}
