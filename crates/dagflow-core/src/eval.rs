//! Lazy pull evaluation and taint propagation.
//!
//! Reading an output with [`Graph::data`] is the only thing that computes
//! anything. A clean output returns its cached value. A dirty one starts a
//! depth-first walk upstream over the producers whose outputs are dirty,
//! evaluating each node once, producers before consumers. The walk uses an
//! explicit stack, so graph depth is not limited by the call stack.
//!
//! Invalidation runs the other way. [`Graph::touch_node`] and
//! [`Graph::touch_output`] mark outputs dirty and push that forward to every
//! consumer. A clean output never has a dirty producer, so propagation stops
//! at outputs that were already dirty.

use std::collections::VecDeque;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::array::Array;
use crate::config::Verbosity;
use crate::error::{GraphError, KernelError};
use crate::graph::{Graph, GraphState};
use crate::id::{NodeId, OutputId};
use crate::node::{ComputeContext, EvalState, Kernel};
use crate::types::DataDescriptor;

/// One step of the evaluation walk.
#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Visit a node: schedule its dirty producers, then itself.
    Enter(NodeIndex<u32>),
    /// All producers are clean; run the kernel.
    Exit(NodeIndex<u32>),
}

impl Graph {
    /// The current value of `output`, computing whatever is stale.
    ///
    /// Repeated calls without an intervening touch return the cached value
    /// and run no kernel.
    pub fn data(&mut self, output: OutputId) -> Result<&Array, GraphError> {
        self.require_closed()?;
        if self.output_port(output)?.is_dirty() {
            self.pull(output.node.slot())?;
        }
        let node = self.node(output.node)?;
        let port = self.output_port(output)?;
        port.cached().ok_or_else(|| GraphError::NodeCompute {
            node: node.name().to_string(),
            id: output.node,
            source: KernelError::MissingOutput { port: output.port },
        })
    }

    /// Marks every output of `node` stale, and everything downstream of it.
    pub fn touch_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        let idx = self.slot(node)?;
        self.taint_from(idx, None);
        Ok(())
    }

    /// Marks `output` stale, and every node that reads it.
    pub fn touch_output(&mut self, output: OutputId) -> Result<(), GraphError> {
        self.output_port(output)?;
        self.taint_from(output.node.slot(), Some(output.port));
        Ok(())
    }

    /// Gives `f` mutable access to the kernel of `node`, then touches the
    /// node so the change is picked up by the next read.
    ///
    /// Fails with [`GraphError::KernelMismatch`] if the node does not run a
    /// `K`. Changes must keep the node's negotiated output descriptors.
    pub fn update_node<K, R>(
        &mut self,
        node: NodeId,
        f: impl FnOnce(&mut K) -> R,
    ) -> Result<R, GraphError>
    where
        K: Kernel + 'static,
    {
        let idx = self.slot(node)?;
        let value = match self.nodes[idx]
            .kernel_any_mut()
            .and_then(|kernel| kernel.downcast_mut::<K>())
        {
            Some(kernel) => f(kernel),
            None => {
                return Err(GraphError::KernelMismatch {
                    node: self.nodes[idx].name().to_string(),
                    expected: std::any::type_name::<K>(),
                })
            }
        };
        self.taint_from(idx, None);
        Ok(value)
    }

    fn require_closed(&self) -> Result<(), GraphError> {
        if self.state != GraphState::Closed {
            return Err(GraphError::NotClosed {
                graph: self.name.clone(),
                state: self.state,
            });
        }
        Ok(())
    }

    /// Brings every output of `target` up to date.
    fn pull(&mut self, target: NodeIndex<u32>) -> Result<(), GraphError> {
        let mut stack = vec![Frame::Enter(target)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(idx) => {
                    let node = &self.nodes[idx];
                    if node.state() == EvalState::Evaluating {
                        let err = GraphError::CyclicEvaluation {
                            node: node.name().to_string(),
                        };
                        self.abandon_walk(&stack);
                        return Err(self.report(err));
                    }
                    if node.is_fresh() {
                        continue;
                    }

                    let producers: Vec<NodeIndex<u32>> = node
                        .inputs()
                        .filter_map(|input| input.source())
                        .filter(|source| {
                            self.output_port(*source)
                                .map(|output| output.is_dirty())
                                .unwrap_or(false)
                        })
                        .map(|source| source.node.slot())
                        .collect();

                    self.nodes[idx].set_state(EvalState::Evaluating);
                    stack.push(Frame::Exit(idx));
                    stack.extend(producers.into_iter().rev().map(Frame::Enter));
                }
                Frame::Exit(idx) => {
                    if let Err(err) = self.evaluate(idx) {
                        self.abandon_walk(&stack);
                        return Err(self.report(err));
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the kernel of `idx` against the cached values of its producers.
    fn evaluate(&mut self, idx: NodeIndex<u32>) -> Result<(), GraphError> {
        let node = &mut self.nodes[idx];
        let id = node.id();
        let was_clean: Vec<u16> = (0..=u16::MAX)
            .zip(node.outputs())
            .filter(|(_, output)| !output.is_dirty())
            .map(|(port, _)| port)
            .collect();
        let Some(mut kernel) = node.take_kernel() else {
            node.set_state(EvalState::Invalidated);
            return Err(GraphError::NodeCompute {
                node: node.name().to_string(),
                id,
                source: KernelError::failed("kernel is unavailable"),
            });
        };
        let mut buffers: Vec<Array> = node.outputs_mut().map(|o| o.take_buffer()).collect();

        let node = &self.nodes[idx];
        let inputs: Vec<Option<&Array>> = node
            .inputs()
            .map(|input| {
                let source = input.source()?;
                self.nodes
                    .node_weight(source.node.slot())?
                    .output_at(source.port)?
                    .cached()
            })
            .collect();
        let mut ctx = ComputeContext::new(node.name(), &inputs, &mut buffers);
        let computed = kernel.compute(&mut ctx);
        let result = computed.and_then(|()| {
            check_outputs(node.outputs().map(|o| (o.name(), o.descriptor())), &buffers)
        });

        let node = &mut self.nodes[idx];
        node.restore_kernel(kernel);
        node.record_call();
        let clean = result.is_ok();
        for (output, buffer) in node.outputs_mut().zip(buffers) {
            output.restore(buffer, clean);
        }

        match result {
            Ok(()) => {
                node.set_state(EvalState::Evaluated);
                if self.config.logs(Verbosity::Debug) {
                    let node = &self.nodes[idx];
                    tracing::debug!(
                        graph = %self.name,
                        node = %node.name(),
                        kind = node.kind(),
                        calls = node.calls(),
                        "evaluated"
                    );
                }
                Ok(())
            }
            Err(source) => {
                node.set_state(EvalState::Invalidated);
                let err = GraphError::NodeCompute {
                    node: node.name().to_string(),
                    id,
                    source,
                };
                // Outputs that were clean lost their value with the failed
                // call, so whatever was computed from them is stale too.
                self.taint_consumers(idx, &was_clean);
                Err(err)
            }
        }
    }

    /// Resets every node still waiting on the walk.
    fn abandon_walk(&mut self, stack: &[Frame]) {
        for frame in stack {
            if let Frame::Exit(idx) = frame {
                self.nodes[*idx].set_state(EvalState::Invalidated);
            }
        }
    }

    fn report(&self, err: GraphError) -> GraphError {
        if self.config.logs(Verbosity::Info) {
            tracing::warn!(graph = %self.name, error = %err, "evaluation failed");
        }
        err
    }

    /// Taints the outputs of `start` (all, or only `port`) and pushes the
    /// change forward through every newly dirty output.
    fn taint_from(&mut self, start: NodeIndex<u32>, port: Option<u16>) {
        self.propagate(start, VecDeque::from([(start, port)]));
    }

    /// Taints every node reading one of `ports` of `idx`.
    fn taint_consumers(&mut self, idx: NodeIndex<u32>, ports: &[u16]) {
        let queue: VecDeque<_> = self
            .nodes
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| ports.contains(&edge.weight().output))
            .map(|edge| (edge.target(), None))
            .collect();
        if !queue.is_empty() {
            self.propagate(idx, queue);
        }
    }

    fn propagate(
        &mut self,
        origin: NodeIndex<u32>,
        mut queue: VecDeque<(NodeIndex<u32>, Option<u16>)>,
    ) {
        let mut tainted = 0usize;

        while let Some((idx, port)) = queue.pop_front() {
            let node = &mut self.nodes[idx];
            let mut fresh_dirty: Vec<u16> = Vec::new();
            match port {
                Some(p) => {
                    if node.output_at_mut(p).is_some_and(|output| output.taint()) {
                        fresh_dirty.push(p);
                    }
                }
                None => {
                    for (p, output) in (0..=u16::MAX).zip(node.outputs_mut()) {
                        if output.taint() {
                            fresh_dirty.push(p);
                        }
                    }
                }
            }
            if fresh_dirty.is_empty() {
                continue;
            }
            if node.state() == EvalState::Evaluated {
                node.set_state(EvalState::Invalidated);
            }
            tainted += fresh_dirty.len();

            for edge in self.nodes.edges_directed(idx, Direction::Outgoing) {
                if fresh_dirty.contains(&edge.weight().output) {
                    queue.push_back((edge.target(), None));
                }
            }
        }

        if tainted > 0 && self.config.logs(Verbosity::Debug) {
            tracing::debug!(
                graph = %self.name,
                node = %self.nodes[origin].name(),
                outputs = tainted,
                "tainted"
            );
        }
    }
}

/// Checks freshly computed buffers against the negotiated descriptors.
fn check_outputs<'a>(
    descriptors: impl Iterator<Item = (&'a str, Option<&'a DataDescriptor>)>,
    buffers: &[Array],
) -> Result<(), KernelError> {
    for ((name, desc), buffer) in descriptors.zip(buffers) {
        if let Some(desc) = desc {
            if !buffer.conforms_to(desc) {
                return Err(KernelError::NonConforming {
                    output: name.to_string(),
                    expected: desc.clone(),
                    actual_dtype: buffer.dtype(),
                    actual_shape: buffer.shape().clone(),
                });
            }
        }
    }
    Ok(())
}
