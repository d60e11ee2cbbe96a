//! The closing protocol.
//!
//! `close()` validates the whole graph in one pass and reports every problem
//! it finds rather than stopping at the first:
//!
//! 1. cycles, found as strongly connected components (`tarjan_scc`);
//! 2. descriptor negotiation, visiting nodes upstream-first. Each input's
//!    constraint is checked against the descriptor of the output feeding it,
//!    then the kernel derives its own output descriptors. Nodes downstream
//!    of a failed node are skipped so one mistake yields one violation;
//! 3. completeness: every mandatory input must be connected.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::Direction;

use crate::config::Verbosity;
use crate::error::{ClosingErrors, GraphError, Violation};
use crate::graph::{Graph, GraphState};
use crate::negotiate::Negotiation;
use crate::node::EvalState;
use crate::types::{DataDescriptor, ShapePattern};

impl Graph {
    /// Validates the graph and freezes its structure.
    ///
    /// On success the graph is [`GraphState::Closed`] and values can be
    /// pulled. On failure every violation is returned in
    /// [`GraphError::Closing`] and the graph is left
    /// [`GraphState::ClosingFailed`], open for fixes and another attempt.
    /// Closing an already closed graph does nothing.
    pub fn close(&mut self) -> Result<(), GraphError> {
        if self.state == GraphState::Closed {
            return Ok(());
        }
        self.reset_for_closing();

        let mut violations = Vec::new();
        let mut failed: HashSet<NodeIndex<u32>> = HashSet::new();

        // tarjan_scc yields components in reverse topological order.
        let mut components = tarjan_scc(&self.nodes);
        components.reverse();

        let mut order = Vec::with_capacity(self.nodes.node_count());
        let mut cycles = Vec::new();
        for component in components {
            let is_cycle = component.len() > 1
                || self.nodes.contains_edge(component[0], component[0]);
            if is_cycle {
                failed.extend(component.iter().copied());
                cycles.push(self.cycle_path(&component));
            } else {
                order.push(component[0]);
            }
        }
        cycles.sort();
        for path in cycles {
            violations.push(Violation::Cycle {
                nodes: self.cycle_names(&path),
            });
        }

        for idx in order {
            if let Err(found) = self.negotiate_node(idx, &failed) {
                failed.insert(idx);
                violations.extend(found);
            }
        }

        self.check_completeness(&mut violations);

        if violations.is_empty() {
            self.state = GraphState::Closed;
            if self.config.logs(Verbosity::Info) {
                tracing::info!(
                    graph = %self.name,
                    nodes = self.nodes.node_count(),
                    connections = self.nodes.edge_count(),
                    "graph closed"
                );
            }
            Ok(())
        } else {
            self.state = GraphState::ClosingFailed;
            if self.config.logs(Verbosity::Info) {
                tracing::warn!(
                    graph = %self.name,
                    violations = violations.len(),
                    "graph failed to close"
                );
            }
            Err(GraphError::Closing(ClosingErrors {
                graph: self.name.clone(),
                violations,
            }))
        }
    }

    /// Forgets descriptors and values from any earlier closing attempt.
    fn reset_for_closing(&mut self) {
        for node in self.nodes.node_weights_mut() {
            node.set_state(EvalState::NotEvaluated);
            for output in node.outputs_mut() {
                output.set_descriptor(None);
                output.reset();
            }
        }
    }

    /// Negotiates one node. `Err` carries the violations it produced, empty
    /// when the node was skipped because something upstream failed or an
    /// input is missing.
    fn negotiate_node(
        &mut self,
        idx: NodeIndex<u32>,
        failed: &HashSet<NodeIndex<u32>>,
    ) -> Result<(), Vec<Violation>> {
        let upstream_failed = self
            .nodes
            .neighbors_directed(idx, Direction::Incoming)
            .any(|producer| failed.contains(&producer));
        // Unconnected mandatory inputs are reported by the completeness check.
        let incomplete = self.nodes[idx]
            .inputs()
            .any(|input| !input.is_connected() && !input.is_optional());
        if upstream_failed || incomplete {
            return Err(Vec::new());
        }

        let input_descriptors = self.input_descriptors(idx);
        let mismatches = self.check_constraints(idx, &input_descriptors);
        if !mismatches.is_empty() {
            return Err(mismatches);
        }

        let Some(mut kernel) = self.nodes[idx].take_kernel() else {
            return Err(Vec::new());
        };
        let node = &self.nodes[idx];
        let inputs = node
            .inputs()
            .zip(&input_descriptors)
            .map(|(input, desc)| (input.name(), desc.as_ref()))
            .collect();
        let mut ctx = Negotiation::new(
            node.name(),
            inputs,
            node.outputs().map(|output| output.name()).collect(),
        );
        let result = kernel.negotiate(&mut ctx);
        let derived = ctx.into_outputs();
        self.nodes[idx].restore_kernel(kernel);

        let node = &self.nodes[idx];
        if let Err(error) = result {
            return Err(vec![Violation::Negotiation {
                node: node.name().to_string(),
                kind: node.kind().to_string(),
                error,
            }]);
        }

        let undetermined: Vec<Violation> = node
            .outputs()
            .zip(&derived)
            .filter(|(_, desc)| desc.is_none())
            .map(|(output, _)| Violation::UndeterminedOutput {
                node: node.name().to_string(),
                output: output.name().to_string(),
            })
            .collect();
        if !undetermined.is_empty() {
            return Err(undetermined);
        }

        if self.config.logs(Verbosity::Debug) {
            let shapes: Vec<String> = derived.iter().flatten().map(|d| d.to_string()).collect();
            tracing::debug!(
                graph = %self.name,
                node = %node.name(),
                kind = node.kind(),
                outputs = %shapes.join(", "),
                "negotiated"
            );
        }

        let node = &mut self.nodes[idx];
        for (output, desc) in node.outputs_mut().zip(derived) {
            output.set_descriptor(desc);
        }
        Ok(())
    }

    /// Descriptor of the output feeding each input of `idx`, in port order.
    fn input_descriptors(&self, idx: NodeIndex<u32>) -> Vec<Option<DataDescriptor>> {
        self.nodes[idx]
            .inputs()
            .map(|input| {
                let source = input.source()?;
                let producer = self.nodes.node_weight(source.node.slot())?;
                producer.output_at(source.port)?.descriptor().cloned()
            })
            .collect()
    }

    fn check_constraints(
        &self,
        idx: NodeIndex<u32>,
        descriptors: &[Option<DataDescriptor>],
    ) -> Vec<Violation> {
        let node = &self.nodes[idx];
        let mut violations = Vec::new();
        for (input, desc) in node.inputs().zip(descriptors) {
            let (Some(constraint), Some(desc), Some(source)) =
                (input.constraint(), desc, input.source())
            else {
                continue;
            };
            let reference = match constraint.shape {
                ShapePattern::SameAs(port) => descriptors
                    .get(port as usize)
                    .and_then(|d| d.as_ref())
                    .map(|d| &d.shape),
                _ => None,
            };
            if constraint.accepts(desc, reference) {
                continue;
            }
            let producer = self.nodes.node_weight(source.node.slot());
            let source_node = producer.map(|n| n.name().to_string()).unwrap_or_default();
            let source_output = producer
                .and_then(|n| n.output_at(source.port))
                .map(|o| o.name().to_string())
                .unwrap_or_default();
            violations.push(Violation::DescriptorMismatch {
                node: node.name().to_string(),
                input: input.name().to_string(),
                source_node,
                source_output,
                expected: constraint.to_string(),
                actual: desc.clone(),
            });
        }
        violations
    }

    fn check_completeness(&self, violations: &mut Vec<Violation>) {
        for node in self.nodes() {
            for input in node.inputs() {
                if !input.is_connected() && !input.is_optional() {
                    violations.push(Violation::MissingConnection {
                        node: node.name().to_string(),
                        input: input.name().to_string(),
                    });
                }
            }
        }
    }

    /// A concrete cycle through a strongly connected component, starting at
    /// its lowest arena slot.
    fn cycle_path(&self, component: &[NodeIndex<u32>]) -> Vec<NodeIndex<u32>> {
        let members: HashSet<NodeIndex<u32>> = component.iter().copied().collect();
        let Some(&start) = component.iter().min() else {
            return Vec::new();
        };

        let mut parent: HashMap<NodeIndex<u32>, NodeIndex<u32>> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.nodes.neighbors_directed(current, Direction::Outgoing) {
                if !members.contains(&next) {
                    continue;
                }
                if next == start {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while cursor != start {
                        match parent.get(&cursor) {
                            Some(&p) => cursor = p,
                            None => break,
                        }
                        path.push(cursor);
                    }
                    path.reverse();
                    return path;
                }
                if !parent.contains_key(&next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        let mut fallback = component.to_vec();
        fallback.sort();
        fallback
    }

    /// Node names along `path`, repeating the first to close the loop.
    fn cycle_names(&self, path: &[NodeIndex<u32>]) -> Vec<String> {
        path.iter()
            .chain(path.first())
            .map(|&idx| self.nodes[idx].name().to_string())
            .collect()
    }

    /// Marks the graph closed without validating it, so evaluation of
    /// malformed graphs can be exercised.
    #[cfg(test)]
    pub(crate) fn force_closed(&mut self) {
        self.state = GraphState::Closed;
    }
}
