//! Nodes and the kernel contract.
//!
//! A [`Node`] owns its ordered inputs and outputs and a boxed [`Kernel`], the
//! pluggable part that node libraries provide. The kernel declares the
//! initial ports ([`Kernel::layout`]), derives output descriptors while the
//! graph closes ([`Kernel::negotiate`]) and fills its outputs when a value is
//! pulled ([`Kernel::compute`]).

use std::any::Any;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::error::{GraphError, KernelError, NegotiationError};
use crate::id::NodeId;
use crate::negotiate::Negotiation;
use crate::port::{Input, InputSpec, Output};
use crate::types::InputConstraint;

// ---------------------------------------------------------------------------
// Kernel contract
// ---------------------------------------------------------------------------

/// Dynamic access to the concrete kernel type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The computation behind a node.
pub trait Kernel: AsAny + fmt::Debug {
    /// Short type label, e.g. `"Sum"`. Shows up in errors and topology dumps.
    fn kind(&self) -> &'static str;

    /// Ports the node starts with.
    fn layout(&self) -> Layout {
        Layout::default()
    }

    /// Derives output descriptors from the descriptors of the inputs.
    ///
    /// Called once while closing, after every upstream node. Input
    /// constraints have already been checked. Source kernels must set all
    /// output descriptors here unconditionally.
    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        let _ = ctx;
        Ok(())
    }

    /// Computes the outputs from the current input values.
    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError>;
}

/// What happens when something is connected to a node as a whole rather than
/// to one of its named inputs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputStrategy {
    /// Fill the next unconnected declared input, in declaration order.
    #[default]
    Fixed,
    /// Append a new input named `"{prefix}_{n}"`.
    AddInput {
        prefix: String,
        constraint: Option<InputConstraint>,
    },
    /// Append a new input and a paired output, `"{input_prefix}_{n}"` and
    /// `"{output_prefix}_{n}"`.
    AddInputAndOutput {
        input_prefix: String,
        output_prefix: String,
    },
}

impl InputStrategy {
    pub fn add_input(prefix: impl Into<String>) -> Self {
        InputStrategy::AddInput {
            prefix: prefix.into(),
            constraint: None,
        }
    }

    pub fn add_input_and_output(
        input_prefix: impl Into<String>,
        output_prefix: impl Into<String>,
    ) -> Self {
        InputStrategy::AddInputAndOutput {
            input_prefix: input_prefix.into(),
            output_prefix: output_prefix.into(),
        }
    }
}

/// Initial ports of a node.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<String>,
    pub strategy: InputStrategy,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, spec: impl Into<InputSpec>) -> Self {
        self.inputs.push(spec.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn strategy(mut self, strategy: InputStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

// ---------------------------------------------------------------------------
// Compute context
// ---------------------------------------------------------------------------

/// What a kernel sees while computing: read-only input values and its own
/// output buffers.
///
/// Input accessors return references that outlive the borrow of the context,
/// so a kernel can hold input values while writing outputs.
pub struct ComputeContext<'a> {
    node: &'a str,
    inputs: &'a [Option<&'a Array>],
    outputs: &'a mut [Array],
}

impl<'a> ComputeContext<'a> {
    pub(crate) fn new(
        node: &'a str,
        inputs: &'a [Option<&'a Array>],
        outputs: &'a mut [Array],
    ) -> Self {
        ComputeContext {
            node,
            inputs,
            outputs,
        }
    }

    /// Name of the node being computed.
    pub fn node(&self) -> &str {
        self.node
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, port: u16) -> Result<&'a Array, KernelError> {
        let inputs: &'a [Option<&'a Array>] = self.inputs;
        inputs
            .get(port as usize)
            .copied()
            .flatten()
            .ok_or(KernelError::MissingInput { port })
    }

    /// Value of an optional input; `None` if it is not connected.
    pub fn optional_input(&self, port: u16) -> Option<&'a Array> {
        let inputs: &'a [Option<&'a Array>] = self.inputs;
        inputs.get(port as usize).copied().flatten()
    }

    /// Values of all connected inputs, in port order.
    pub fn inputs(&self) -> impl Iterator<Item = &'a Array> + 'a {
        let inputs: &'a [Option<&'a Array>] = self.inputs;
        inputs.iter().filter_map(|input| *input)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&mut self, port: u16) -> Result<&mut Array, KernelError> {
        self.outputs
            .get_mut(port as usize)
            .ok_or(KernelError::MissingOutput { port })
    }

    pub fn outputs_mut(&mut self) -> &mut [Array] {
        &mut *self.outputs
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Evaluation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalState {
    NotEvaluated,
    Evaluating,
    Evaluated,
    Invalidated,
}

/// A computational unit in a graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: &'static str,
    inputs: IndexMap<String, Input>,
    outputs: IndexMap<String, Output>,
    /// `None` only while the kernel is lent out to a compute or negotiate call.
    kernel: Option<Box<dyn Kernel>>,
    strategy: InputStrategy,
    state: EvalState,
    calls: u64,
}

impl Node {
    /// Wraps `kernel` in a node that is not yet placed in a graph. Ports are
    /// created by [`Node::attach`] once the arena slot is known.
    pub(crate) fn new(id: NodeId, name: String, kernel: Box<dyn Kernel>) -> Self {
        Node {
            id,
            name,
            kind: kernel.kind(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            kernel: Some(kernel),
            strategy: InputStrategy::Fixed,
            state: EvalState::NotEvaluated,
            calls: 0,
        }
    }

    /// Records the node's final handle and creates the kernel's declared ports.
    pub(crate) fn attach(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.id = id;
        let layout = match &self.kernel {
            Some(kernel) => kernel.layout(),
            None => Layout::default(),
        };
        self.strategy = layout.strategy;
        for spec in layout.inputs {
            self.add_input(spec)?;
        }
        for name in layout.outputs {
            self.add_output(name)?;
        }
        Ok(())
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn state(&self) -> EvalState {
        self.state
    }

    pub fn strategy(&self) -> &InputStrategy {
        &self.strategy
    }

    /// Number of compute calls since creation or the last reset.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Input> {
        self.inputs.values()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    pub fn input_at(&self, port: u16) -> Option<&Input> {
        self.inputs.get_index(port as usize).map(|(_, input)| input)
    }

    pub fn output_at(&self, port: u16) -> Option<&Output> {
        self.outputs.get_index(port as usize).map(|(_, output)| output)
    }

    pub fn input_port(&self, name: &str) -> Option<u16> {
        self.inputs.get_index_of(name).map(|i| i as u16)
    }

    pub fn output_port(&self, name: &str) -> Option<u16> {
        self.outputs.get_index_of(name).map(|i| i as u16)
    }

    /// The kernel, downcast to its concrete type.
    pub fn kernel<K: Kernel + 'static>(&self) -> Option<&K> {
        self.kernel.as_deref()?.as_any().downcast_ref::<K>()
    }

    /// Returns `true` if every output holds a clean value.
    pub fn is_fresh(&self) -> bool {
        self.state == EvalState::Evaluated && self.outputs.values().all(|o| !o.is_dirty())
    }

    // -----------------------------------------------------------------------
    // Crate-internal mutation
    // -----------------------------------------------------------------------

    pub(crate) fn add_input(&mut self, spec: InputSpec) -> Result<u16, GraphError> {
        if self.inputs.contains_key(&spec.name) {
            return Err(GraphError::DuplicatePort {
                node: self.name.clone(),
                port: spec.name,
            });
        }
        let port = self.next_port(self.inputs.len(), "input")?;
        self.inputs.insert(spec.name.clone(), Input::new(self.id, spec));
        Ok(port)
    }

    pub(crate) fn add_output(&mut self, name: String) -> Result<u16, GraphError> {
        if self.outputs.contains_key(&name) {
            return Err(GraphError::DuplicatePort {
                node: self.name.clone(),
                port: name,
            });
        }
        let port = self.next_port(self.outputs.len(), "output")?;
        self.outputs
            .insert(name.clone(), Output::new(self.id, name));
        Ok(port)
    }

    /// Port index for a new port after `count` existing ones.
    fn next_port(&self, count: usize, kind: &'static str) -> Result<u16, GraphError> {
        u16::try_from(count).map_err(|_| GraphError::TooManyPorts {
            node: self.name.clone(),
            kind,
            limit: usize::from(u16::MAX) + 1,
        })
    }

    /// Drops ports added after the node had `inputs` inputs and `outputs`
    /// outputs. The dropped inputs must already be unbound.
    pub(crate) fn truncate_ports(&mut self, inputs: usize, outputs: usize) {
        self.inputs.truncate(inputs);
        self.outputs.truncate(outputs);
    }

        pub(crate) fn input_at_mut(&mut self, port: u16) -> Option<&mut Input> {
        self.inputs.get_index_mut(port as usize).map(|(_, input)| input)
    }

    pub(crate) fn output_at_mut(&mut self, port: u16) -> Option<&mut Output> {
        self.outputs
            .get_index_mut(port as usize)
            .map(|(_, output)| output)
    }

    pub(crate) fn outputs_mut(&mut self) -> impl Iterator<Item = &mut Output> {
        self.outputs.values_mut()
    }

    pub(crate) fn set_state(&mut self, state: EvalState) {
        self.state = state;
    }

    pub(crate) fn record_call(&mut self) {
        self.calls += 1;
    }

    pub(crate) fn reset_calls(&mut self) {
        self.calls = 0;
    }

    pub(crate) fn take_kernel(&mut self) -> Option<Box<dyn Kernel>> {
        self.kernel.take()
    }

    pub(crate) fn restore_kernel(&mut self, kernel: Box<dyn Kernel>) {
        self.kernel = Some(kernel);
    }

    pub(crate) fn kernel_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self.kernel.as_deref_mut()?.as_any_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GraphId;

    #[derive(Debug)]
    struct Passthrough;

    impl Kernel for Passthrough {
        fn kind(&self) -> &'static str {
            "Passthrough"
        }

        fn layout(&self) -> Layout {
            Layout::new().input("in").output("out")
        }

        fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
            let value = ctx.input(0)?;
            ctx.output(0)?.assign(value)?;
            Ok(())
        }
    }

    fn node_id() -> NodeId {
        NodeId {
            graph: GraphId::new(),
            index: 0,
            generation: 0,
        }
    }

    fn attached(kernel: impl Kernel + 'static) -> Node {
        let id = node_id();
        let mut node = Node::new(id, "p".into(), Box::new(kernel));
        node.attach(id).unwrap();
        node
    }

    #[test]
    fn layout_creates_ports_in_order() {
        let node = attached(Passthrough);
        assert_eq!(node.kind(), "Passthrough");
        assert_eq!(node.input_port("in"), Some(0));
        assert_eq!(node.output_port("out"), Some(0));
        assert_eq!(node.state(), EvalState::NotEvaluated);
        assert!(!node.is_fresh());
    }

    #[test]
    fn duplicate_port_names_are_rejected() {
        let mut node = attached(Passthrough);
        let result = node.add_input(InputSpec::new("in"));
        match result {
            Err(GraphError::DuplicatePort { node, port }) => {
                assert_eq!(node, "p");
                assert_eq!(port, "in");
            }
            _ => panic!("expected DuplicatePort error"),
        }
        assert_eq!(node.add_input(InputSpec::new("in2")).unwrap(), 1);
    }

    #[test]
    fn port_indices_stop_at_u16_range() {
        let mut node = attached(Passthrough);
        for i in node.output_count()..=usize::from(u16::MAX) {
            node.add_output(format!("out_{i}")).unwrap();
        }
        assert_eq!(node.output_port("out_65535"), Some(u16::MAX));

        match node.add_output("one_too_many".into()) {
            Err(GraphError::TooManyPorts { kind, limit, .. }) => {
                assert_eq!(kind, "output");
                assert_eq!(limit, 65536);
            }
            other => panic!("expected TooManyPorts, got {other:?}"),
        }
        assert_eq!(node.output_count(), 65536);
    }

        #[test]
    fn kernel_downcast() {
        let node = attached(Passthrough);
        assert!(node.kernel::<Passthrough>().is_some());
    }

    #[test]
    fn compute_context_hands_out_inputs_and_outputs() {
        let a = Array::from_vec(vec![1.0f64, 2.0]);
        let inputs = [Some(&a), None];
        let mut outputs = [Array::from_vec(vec![0.0f64, 0.0])];
        let mut ctx = ComputeContext::new("p", &inputs, &mut outputs);

        assert_eq!(ctx.input_count(), 2);
        assert!(ctx.optional_input(1).is_none());
        assert!(matches!(ctx.input(1), Err(KernelError::MissingInput { port: 1 })));
        assert_eq!(ctx.inputs().count(), 1);

        let mut kernel = Passthrough;
        kernel.compute(&mut ctx).unwrap();
        assert_eq!(outputs[0].to_f64_vec(), vec![1.0, 2.0]);
    }
}
