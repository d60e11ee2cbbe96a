//! Connecting to nodes as a whole.
//!
//! [`Graph::connect`] needs an exact input. The helpers here take a target
//! node instead and let its [`InputStrategy`] decide which input receives the
//! connection, growing the node when the strategy allows it. Arity is checked
//! before touching the graph, and a helper that fails midway undoes the
//! connections and ports it already made, so nothing is left half-connected.

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{InputId, NodeId, OutputId};
use crate::node::InputStrategy;
use crate::port::InputSpec;

/// Changes made so far by a connection helper.
#[derive(Debug, Default)]
struct Undo {
    /// Port counts of each touched node before the helper ran.
    sizes: Vec<(NodeIndex<u32>, usize, usize)>,
    linked: Vec<InputId>,
}

impl Graph {
    /// Connects `output` to `node`, choosing or creating the input according
    /// to the node's strategy:
    ///
    /// - `Fixed`: the first unconnected input, in declaration order;
    /// - `AddInput`: a new input `"{prefix}_{n}"`;
    /// - `AddInputAndOutput`: a new input `"{input_prefix}_{n}"` plus the
    ///   output `"{output_prefix}_{n}"`, with `n` free on both sides.
    pub fn connect_to(&mut self, output: OutputId, node: NodeId) -> Result<InputId, GraphError> {
        self.check_open()?;
        self.atomically(|g, undo| g.connect_one(output, node, undo))
    }

    /// Connects each of `outputs` to `node` in order, like repeated
    /// [`Graph::connect_to`].
    pub fn connect_all(
        &mut self,
        outputs: &[OutputId],
        node: NodeId,
    ) -> Result<Vec<InputId>, GraphError> {
        self.check_open()?;
        for &output in outputs {
            self.output_port(output)?;
            self.check_acyclic(output, node)?;
        }
        self.check_capacity(node, outputs.len())?;

        self.atomically(|g, undo| {
            outputs
                .iter()
                .map(|&output| g.connect_one(output, node, undo))
                .collect()
        })
    }

    /// Connects the only output of each node in `sources` to `node`.
    ///
    /// Fails with [`GraphError::AmbiguousOutput`] if a source has more than
    /// one output.
    pub fn connect_nodes(
        &mut self,
        sources: &[NodeId],
        node: NodeId,
    ) -> Result<Vec<InputId>, GraphError> {
        let outputs = sources
            .iter()
            .map(|&source| self.sole_output(source))
            .collect::<Result<Vec<_>, _>>()?;
        self.connect_all(&outputs, node)
    }

    /// Connects `output` to every node in `targets` (fan-out). A node listed
    /// twice receives two connections.
    pub fn connect_each(
        &mut self,
        output: OutputId,
        targets: &[NodeId],
    ) -> Result<Vec<InputId>, GraphError> {
        self.check_open()?;
        self.output_port(output)?;
        let mut demand: IndexMap<NodeId, usize> = IndexMap::new();
        for &target in targets {
            self.check_acyclic(output, target)?;
            *demand.entry(target).or_default() += 1;
        }
        for (&target, &count) in &demand {
            self.check_capacity(target, count)?;
        }

        self.atomically(|g, undo| {
            targets
                .iter()
                .map(|&target| g.connect_one(output, target, undo))
                .collect()
        })
    }

    /// The single output of `node`.
    pub fn sole_output(&self, node: NodeId) -> Result<OutputId, GraphError> {
        let n = self.node(node)?;
        match n.output_count() {
            1 => Ok(node.output(0)),
            0 => Err(GraphError::PortNotFound {
                node: n.name().to_string(),
                port: "output".to_string(),
            }),
            count => Err(GraphError::AmbiguousOutput {
                node: n.name().to_string(),
                count,
            }),
        }
    }

    /// Runs `f`, reverting everything it recorded in the [`Undo`] log if it
    /// fails.
    fn atomically<T>(
        &mut self,
        f: impl FnOnce(&mut Graph, &mut Undo) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let mut undo = Undo::default();
        let result = f(self, &mut undo);
        if result.is_err() {
            for input in undo.linked.into_iter().rev() {
                self.unlink(input);
            }
            for (idx, inputs, outputs) in undo.sizes {
                self.nodes[idx].truncate_ports(inputs, outputs);
            }
        }
        result
    }

    fn connect_one(
        &mut self,
        output: OutputId,
        node: NodeId,
        undo: &mut Undo,
    ) -> Result<InputId, GraphError> {
        let idx = self.slot(node)?;
        self.output_port(output)?;
        self.check_acyclic(output, node)?;
        if !undo.sizes.iter().any(|&(touched, ..)| touched == idx) {
            let n = &self.nodes[idx];
            undo.sizes.push((idx, n.input_count(), n.output_count()));
        }

        let input = match self.nodes[idx].strategy().clone() {
            InputStrategy::Fixed => {
                let target = &self.nodes[idx];
                let port = (0..=u16::MAX)
                    .zip(target.inputs())
                    .find(|(_, input)| !input.is_connected())
                    .map(|(port, _)| port)
                    .ok_or_else(|| GraphError::NoFreeInput {
                        node: target.name().to_string(),
                    })?;
                node.input(port)
            }
            InputStrategy::AddInput { prefix, constraint } => {
                let name = self.next_input_name(node, &prefix)?;
                let mut spec = InputSpec::new(name);
                spec.constraint = constraint;
                self.add_input(node, spec)?
            }
            InputStrategy::AddInputAndOutput {
                input_prefix,
                output_prefix,
            } => {
                let n = self.next_pair_index(idx, &input_prefix, &output_prefix);
                let input = self.add_input(node, format!("{input_prefix}_{n}"))?;
                self.add_output(node, format!("{output_prefix}_{n}"))?;
                input
            }
        };

        self.connect(output, input)?;
        undo.linked.push(input);
        Ok(input)
    }

    /// Fails unless `node` can take `count` more connections.
    fn check_capacity(&self, node: NodeId, count: usize) -> Result<(), GraphError> {
        let n = self.node(node)?;
        if let InputStrategy::Fixed = n.strategy() {
            let free = n.inputs().filter(|input| !input.is_connected()).count();
            if free < count {
                return Err(GraphError::NoFreeInput {
                    node: n.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// First `"{prefix}_{n}"` not yet used by an input of `node`.
    fn next_input_name(&self, node: NodeId, prefix: &str) -> Result<String, GraphError> {
        let n = self.node(node)?;
        let name = (n.input_count()..)
            .map(|i| format!("{prefix}_{i}"))
            .find(|name| n.input(name).is_none())
            .unwrap_or_else(|| prefix.to_string());
        Ok(name)
    }

    /// First `n` for which neither `"{input_prefix}_{n}"` nor
    /// `"{output_prefix}_{n}"` is taken on the node at `idx`.
    fn next_pair_index(
        &self,
        idx: NodeIndex<u32>,
        input_prefix: &str,
        output_prefix: &str,
    ) -> usize {
        let n = &self.nodes[idx];
        (n.input_count()..)
            .find(|i| {
                n.input(&format!("{input_prefix}_{i}")).is_none()
                    && n.output(&format!("{output_prefix}_{i}")).is_none()
            })
            .unwrap_or(n.input_count())
    }
}
