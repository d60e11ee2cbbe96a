//! Lazy dataflow graphs.
//!
//! A [`Graph`] owns nodes connected output-to-input. Each node runs a
//! [`Kernel`]. Building is followed by [`Graph::close`], which validates the
//! structure and negotiates the [`DataDescriptor`] of every output. After
//! that, values are computed only when read with [`Graph::data`], cached, and
//! recomputed only after something upstream was touched.

pub mod array;
mod close;
pub mod config;
mod connect;
pub mod error;
mod eval;
pub mod graph;
pub mod id;
pub mod negotiate;
pub mod node;
pub mod port;
pub mod profile;
pub mod topology;
pub mod types;
pub mod walk;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use array::{Array, Buffer, Element};
pub use config::{GraphConfig, Verbosity};
pub use error::{ArrayError, ClosingErrors, GraphError, KernelError, NegotiationError, Violation, ViolationKind};
pub use graph::{Graph, GraphState, Link};
pub use id::{GraphId, InputId, NodeId, OutputId};
pub use negotiate::Negotiation;
pub use node::{ComputeContext, EvalState, InputStrategy, Kernel, Layout, Node};
pub use port::{Input, InputSpec, Leg, Output};
pub use profile::CallReport;
pub use topology::Topology;
pub use types::{DType, DTypeClass, DataDescriptor, Dim, InputConstraint, Shape, ShapePattern};
pub use walk::{Subgraph, Walker};
