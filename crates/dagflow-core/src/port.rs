//! Connection points of a node.
//!
//! [`Input`] and [`Output`] share the [`Leg`] identity: a name that is unique
//! within the owning node plus the handle of that node. Connections are not
//! separate objects: an input stores the [`OutputId`] it reads from, and the
//! graph keeps the matching producer -> consumer edge for the reverse
//! direction.

use petgraph::graph::EdgeIndex;
use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::id::{NodeId, OutputId};
use crate::types::{DataDescriptor, InputConstraint};

/// Identity shared by inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub name: String,
    pub node: NodeId,
}

/// Declaration of an input, used when a node is created or grown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(default)]
    pub constraint: Option<InputConstraint>,
    /// An optional input may stay unconnected in a closed graph.
    #[serde(default)]
    pub optional: bool,
}

impl InputSpec {
    pub fn new(name: impl Into<String>) -> Self {
        InputSpec {
            name: name.into(),
            constraint: None,
            optional: false,
        }
    }

    pub fn constrained(mut self, constraint: InputConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl From<&str> for InputSpec {
    fn from(name: &str) -> Self {
        InputSpec::new(name)
    }
}

impl From<String> for InputSpec {
    fn from(name: String) -> Self {
        InputSpec::new(name)
    }
}

/// A named consumption point.
#[derive(Debug, Clone)]
pub struct Input {
    leg: Leg,
    source: Option<OutputId>,
    /// Graph edge backing `source`, kept so disconnecting is O(1).
    edge: Option<EdgeIndex<u32>>,
    constraint: Option<InputConstraint>,
    optional: bool,
}

impl Input {
    pub(crate) fn new(node: NodeId, spec: InputSpec) -> Self {
        Input {
            leg: Leg {
                name: spec.name,
                node,
            },
            source: None,
            edge: None,
            constraint: spec.constraint,
            optional: spec.optional,
        }
    }

    pub fn leg(&self) -> &Leg {
        &self.leg
    }

    pub fn name(&self) -> &str {
        &self.leg.name
    }

    pub fn node(&self) -> NodeId {
        self.leg.node
    }

    /// The output this input reads from, if connected.
    pub fn source(&self) -> Option<OutputId> {
        self.source
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    pub fn constraint(&self) -> Option<&InputConstraint> {
        self.constraint.as_ref()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub(crate) fn bind(&mut self, source: OutputId, edge: EdgeIndex<u32>) {
        self.source = Some(source);
        self.edge = Some(edge);
    }

    pub(crate) fn unbind(&mut self) -> Option<EdgeIndex<u32>> {
        self.source = None;
        self.edge.take()
    }
}

/// A named production point.
///
/// Holds the negotiated descriptor and the value buffer. The buffer is kept
/// across invalidations for reuse, but it is only exposed through
/// [`Output::cached`] while the output is clean.
#[derive(Debug, Clone)]
pub struct Output {
    leg: Leg,
    descriptor: Option<DataDescriptor>,
    buffer: Option<Array>,
    dirty: bool,
}

impl Output {
    pub(crate) fn new(node: NodeId, name: String) -> Self {
        Output {
            leg: Leg { name, node },
            descriptor: None,
            buffer: None,
            dirty: true,
        }
    }

    pub fn leg(&self) -> &Leg {
        &self.leg
    }

    pub fn name(&self) -> &str {
        &self.leg.name
    }

    pub fn node(&self) -> NodeId {
        self.leg.node
    }

    /// The negotiated descriptor; `None` until the graph has been closed.
    pub fn descriptor(&self) -> Option<&DataDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The cached value, present iff the output is clean.
    pub fn cached(&self) -> Option<&Array> {
        if self.dirty {
            None
        } else {
            self.buffer.as_ref()
        }
    }

    pub(crate) fn set_descriptor(&mut self, descriptor: Option<DataDescriptor>) {
        self.descriptor = descriptor;
    }

    /// Marks the output stale. Returns `true` if it was clean before.
    pub(crate) fn taint(&mut self) -> bool {
        !std::mem::replace(&mut self.dirty, true)
    }

    /// Moves the buffer out for a compute call, allocating it on first use.
    pub(crate) fn take_buffer(&mut self) -> Array {
        match (self.buffer.take(), &self.descriptor) {
            (Some(buffer), _) => buffer,
            (None, Some(desc)) => Array::zeros(desc),
            (None, None) => Array::from_vec(Vec::<f64>::new()),
        }
    }

    /// Puts a buffer back after a compute call.
    pub(crate) fn restore(&mut self, buffer: Array, clean: bool) {
        self.buffer = Some(buffer);
        self.dirty = !clean;
    }

    /// Drops the cached value ahead of another closing attempt.
    pub(crate) fn reset(&mut self) {
        self.buffer = None;
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GraphId;
    use crate::types::DType;

    fn node() -> NodeId {
        NodeId {
            graph: GraphId::new(),
            index: 0,
            generation: 0,
        }
    }

    #[test]
    fn new_output_is_dirty_and_uncached() {
        let output = Output::new(node(), "result".into());
        assert!(output.is_dirty());
        assert!(output.cached().is_none());
        assert!(output.descriptor().is_none());
    }

    #[test]
    fn cached_only_while_clean() {
        let mut output = Output::new(node(), "result".into());
        output.set_descriptor(Some(DataDescriptor::new(DType::F64, [3])));
        let buffer = output.take_buffer();
        assert_eq!(buffer.len(), 3);
        output.restore(buffer, true);
        assert!(output.cached().is_some());

        assert!(output.taint());
        assert!(output.cached().is_none());
        assert!(!output.taint());
    }

    #[test]
    fn failed_compute_keeps_buffer_hidden() {
        let mut output = Output::new(node(), "result".into());
        output.set_descriptor(Some(DataDescriptor::new(DType::I32, [2])));
        let buffer = output.take_buffer();
        output.restore(buffer, false);
        assert!(output.is_dirty());
        assert!(output.cached().is_none());
    }

    #[test]
    fn input_spec_builders() {
        let spec = InputSpec::new("weight").optional();
        assert!(spec.optional);
        assert!(spec.constraint.is_none());

        let input = Input::new(node(), spec);
        assert_eq!(input.name(), "weight");
        assert!(input.is_optional());
        assert!(!input.is_connected());
    }
}
