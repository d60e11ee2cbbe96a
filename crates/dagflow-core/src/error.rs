//! Error types for dagflow-core.
//!
//! Uses `thiserror` for structured, matchable variants. [`GraphError`] is
//! what every public [`Graph`](crate::graph::Graph) operation returns. The
//! closing protocol never stops at the first problem: it gathers every
//! [`Violation`] into one [`ClosingErrors`] report.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::GraphState;
use crate::id::{GraphId, NodeId};
use crate::types::{DType, DTypeClass, DataDescriptor, Shape};

/// Errors produced by [`Array`](crate::array::Array) operations.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ArrayError {
    #[error("buffer of {len} elements does not fill shape {shape}")]
    SizeMismatch { shape: Shape, len: usize },

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DTypeMismatch { expected: DType, actual: DType },
}

/// Failure reported by a kernel's compute procedure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("input {port} has no value")]
    MissingInput { port: u16 },

    #[error("output {port} does not exist")]
    MissingOutput { port: u16 },

    #[error(transparent)]
    Array(#[from] ArrayError),

    /// The kernel left an output that disagrees with its negotiated descriptor.
    #[error("output '{output}' must be {expected}, kernel produced {actual_dtype}{actual_shape}")]
    NonConforming {
        output: String,
        expected: DataDescriptor,
        actual_dtype: DType,
        actual_shape: Shape,
    },

    #[error("{reason}")]
    Failed { reason: String },
}

impl KernelError {
    pub fn failed(reason: impl Into<String>) -> Self {
        KernelError::Failed {
            reason: reason.into(),
        }
    }
}

/// Failure of a descriptor rule while negotiating a single node.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum NegotiationError {
    #[error("input {port} is not connected")]
    InputNotConnected { port: u16 },

    #[error("no input named '{name}'")]
    UnknownInput { name: String },

    #[error("no output named '{name}'")]
    UnknownOutput { name: String },

    #[error("port {port} is out of range")]
    PortOutOfRange { port: u16 },

    #[error("input {port}: expected dtype {expected}, got {actual}")]
    DTypeMismatch {
        port: u16,
        expected: DTypeClass,
        actual: DType,
    },

    #[error("input {port}: expected shape {expected}, got {actual}")]
    ShapeMismatch {
        port: u16,
        expected: String,
        actual: Shape,
    },

    #[error("input {port}: expected {expected} dimension(s), got shape {actual}")]
    RankMismatch {
        port: u16,
        expected: usize,
        actual: Shape,
    },

    #[error("inputs disagree on shape: input {first} is {first_shape}, input {other} is {other_shape}")]
    InconsistentShapes {
        first: u16,
        first_shape: Shape,
        other: u16,
        other_shape: Shape,
    },

    #[error("inputs disagree on dtype: input {first} is {first_dtype}, input {other} is {other_dtype}")]
    InconsistentDTypes {
        first: u16,
        first_dtype: DType,
        other: u16,
        other_dtype: DType,
    },

    #[error("input {port}: expected a square matrix, got shape {actual}")]
    NotSquare { port: u16, actual: Shape },

    #[error("inputs {left} {left_shape} and {right} {right_shape} are not matrix-multipliable")]
    NotMultipliable {
        left: u16,
        left_shape: Shape,
        right: u16,
        right_shape: Shape,
    },

    #[error("no inputs to derive a descriptor from")]
    NoInputs,

    #[error("{reason}")]
    Rule { reason: String },
}

/// Which closing-time error class a [`Violation`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Structural problem with the graph itself (a cycle).
    GraphValidation,
    /// Descriptor mismatch or failed descriptor derivation.
    TypeNegotiation,
    /// An unconnected mandatory input.
    MissingConnection,
}

/// One problem found while closing a graph.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum Violation {
    #[error("cycle through nodes [{}]", .nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },

    #[error(
        "node '{node}' input '{input}' expects {expected}, but '{source_node}.{source_output}' provides {actual}"
    )]
    DescriptorMismatch {
        node: String,
        input: String,
        source_node: String,
        source_output: String,
        expected: String,
        actual: DataDescriptor,
    },

    #[error("node '{node}' ({kind}): {error}")]
    Negotiation {
        node: String,
        kind: String,
        error: NegotiationError,
    },

    #[error("node '{node}' left output '{output}' without a descriptor")]
    UndeterminedOutput { node: String, output: String },

    #[error("node '{node}' input '{input}' is not connected")]
    MissingConnection { node: String, input: String },
}

impl Violation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::Cycle { .. } => ViolationKind::GraphValidation,
            Violation::DescriptorMismatch { .. }
            | Violation::Negotiation { .. }
            | Violation::UndeterminedOutput { .. } => ViolationKind::TypeNegotiation,
            Violation::MissingConnection { .. } => ViolationKind::MissingConnection,
        }
    }
}

/// Every violation found by one `close()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingErrors {
    pub graph: String,
    pub violations: Vec<Violation>,
}

impl ClosingErrors {
    /// Returns `true` if any violation is of class `kind`.
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind() == kind)
    }

    pub fn of_kind(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.kind() == kind)
    }
}

impl fmt::Display for ClosingErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "graph '{}' failed to close with {} violation(s)",
            self.graph,
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClosingErrors {}

/// Errors produced by graph construction, closing and evaluation.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Mutation attempted on a closed graph.
    #[error("graph '{graph}' is closed")]
    GraphClosed { graph: String },

    /// Evaluation attempted before the graph was closed.
    #[error("graph '{graph}' is {state:?}, values can only be read once it is closed")]
    NotClosed { graph: String, state: GraphState },

    #[error("handle belongs to graph {found}, not graph {expected}")]
    ForeignGraph { expected: GraphId, found: GraphId },

    #[error("node not found: NodeId({id})")]
    NodeNotFound { id: NodeId },

    #[error("node '{node}' has no port '{port}'")]
    PortNotFound { node: String, port: String },

    #[error("node '{node}' already has a port named '{port}'")]
    DuplicatePort { node: String, port: String },

    #[error("node '{node}' cannot take more than {limit} {kind}s")]
    TooManyPorts {
        node: String,
        kind: &'static str,
        limit: usize,
    },

    #[error("input '{node}.{input}' is already connected to '{bound_to}'")]
    AlreadyConnected {
        node: String,
        input: String,
        bound_to: String,
    },

    #[error("node '{node}' has no free input to connect to")]
    NoFreeInput { node: String },

    #[error("node '{node}' has {count} outputs, pick one explicitly")]
    AmbiguousOutput { node: String, count: usize },

    #[error("connecting '{from}' to '{to}' would create a cycle")]
    WouldCycle { from: String, to: String },

    #[error("node '{node}' still feeds [{}]", .consumers.join(", "))]
    RemovalBlocked {
        node: String,
        consumers: Vec<String>,
    },

    #[error(transparent)]
    Closing(#[from] ClosingErrors),

    #[error("node '{node}' (NodeId({id})) failed to compute: {source}")]
    NodeCompute {
        node: String,
        id: NodeId,
        #[source]
        source: KernelError,
    },

    #[error("node '{node}' was re-entered while evaluating")]
    CyclicEvaluation { node: String },

    #[error("node '{node}' does not run a {expected} kernel")]
    KernelMismatch { node: String, expected: &'static str },
}
