//! Closing-time descriptor negotiation for a single node.
//!
//! [`Negotiation`] is handed to [`Kernel::negotiate`](crate::node::Kernel::negotiate).
//! It exposes the descriptors already established on the outputs feeding
//! the node and collects the descriptors the kernel derives for its own
//! outputs. The `require_*` helpers cover the usual checks so kernels rarely
//! need to inspect shapes by hand.

use crate::error::NegotiationError;
use crate::types::{DType, DTypeClass, DataDescriptor, ShapePattern};

/// Negotiation state of one node.
#[derive(Debug)]
pub struct Negotiation<'a> {
    node: &'a str,
    inputs: Vec<(&'a str, Option<&'a DataDescriptor>)>,
    outputs: Vec<(&'a str, Option<DataDescriptor>)>,
}

impl<'a> Negotiation<'a> {
    pub(crate) fn new(
        node: &'a str,
        inputs: Vec<(&'a str, Option<&'a DataDescriptor>)>,
        outputs: Vec<&'a str>,
    ) -> Self {
        Negotiation {
            node,
            inputs,
            outputs: outputs.into_iter().map(|name| (name, None)).collect(),
        }
    }

    pub(crate) fn into_outputs(self) -> Vec<Option<DataDescriptor>> {
        self.outputs.into_iter().map(|(_, desc)| desc).collect()
    }

    pub fn node(&self) -> &str {
        self.node
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    // -----------------------------------------------------------------------
    // Reading inputs
    // -----------------------------------------------------------------------

    /// Descriptor of the output connected to input `port`.
    pub fn input(&self, port: u16) -> Result<&'a DataDescriptor, NegotiationError> {
        match self.inputs.get(port as usize) {
            Some((_, Some(desc))) => Ok(desc),
            Some((_, None)) => Err(NegotiationError::InputNotConnected { port }),
            None => Err(NegotiationError::PortOutOfRange { port }),
        }
    }

    pub fn input_named(&self, name: &str) -> Result<&'a DataDescriptor, NegotiationError> {
        let port = self
            .inputs
            .iter()
            .position(|(input, _)| *input == name)
            .ok_or_else(|| NegotiationError::UnknownInput { name: name.into() })?;
        self.input(port as u16)
    }

    /// Descriptors of every connected input with their ports.
    pub fn connected_inputs(&self) -> impl Iterator<Item = (u16, &'a DataDescriptor)> + '_ {
        self.inputs
            .iter()
            .enumerate()
            .filter_map(|(port, (_, desc))| desc.map(|d| (port as u16, d)))
    }

    /// Numpy-style result type over all connected inputs.
    pub fn promoted_dtype(&self) -> Result<DType, NegotiationError> {
        self.connected_inputs()
            .map(|(_, desc)| desc.dtype)
            .reduce(DType::promote)
            .ok_or(NegotiationError::NoInputs)
    }

    // -----------------------------------------------------------------------
    // Writing outputs
    // -----------------------------------------------------------------------

    /// Descriptor derived so far for output `port`.
    pub fn output(&self, port: u16) -> Option<&DataDescriptor> {
        self.outputs.get(port as usize)?.1.as_ref()
    }

    pub fn set_output(&mut self, port: u16, desc: DataDescriptor) -> Result<(), NegotiationError> {
        let slot = self
            .outputs
            .get_mut(port as usize)
            .ok_or(NegotiationError::PortOutOfRange { port })?;
        slot.1 = Some(desc);
        Ok(())
    }

    pub fn set_output_named(&mut self, name: &str, desc: DataDescriptor) -> Result<(), NegotiationError> {
        let slot = self
            .outputs
            .iter_mut()
            .find(|(output, _)| *output == name)
            .ok_or_else(|| NegotiationError::UnknownOutput { name: name.into() })?;
        slot.1 = Some(desc);
        Ok(())
    }

    pub fn set_all_outputs(&mut self, desc: &DataDescriptor) {
        for slot in &mut self.outputs {
            slot.1 = Some(desc.clone());
        }
    }

    /// Gives every output the descriptor of input `port`.
    pub fn copy_input_to_outputs(&mut self, port: u16) -> Result<(), NegotiationError> {
        let desc = self.input(port)?;
        self.set_all_outputs(desc);
        Ok(())
    }

    /// Gives output `i` the descriptor of input `i`, for nodes whose inputs
    /// and outputs come in pairs.
    pub fn copy_inputs_pairwise(&mut self) -> Result<(), NegotiationError> {
        for port in 0..self.outputs.len() as u16 {
            let desc = self.input(port)?.clone();
            self.set_output(port, desc)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------------

    pub fn require_dtype(&self, port: u16, class: DTypeClass) -> Result<(), NegotiationError> {
        let desc = self.input(port)?;
        if !class.accepts(desc.dtype) {
            return Err(NegotiationError::DTypeMismatch {
                port,
                expected: class,
                actual: desc.dtype,
            });
        }
        Ok(())
    }

    pub fn require_rank(&self, port: u16, rank: usize) -> Result<(), NegotiationError> {
        let desc = self.input(port)?;
        if desc.rank() != rank {
            return Err(NegotiationError::RankMismatch {
                port,
                expected: rank,
                actual: desc.shape.clone(),
            });
        }
        Ok(())
    }

    pub fn require_shape(&self, port: u16, pattern: &ShapePattern) -> Result<(), NegotiationError> {
        let desc = self.input(port)?;
        let reference = match pattern {
            ShapePattern::SameAs(other) => Some(&self.input(*other)?.shape),
            _ => None,
        };
        if !pattern.matches(&desc.shape, reference) {
            return Err(NegotiationError::ShapeMismatch {
                port,
                expected: pattern.to_string(),
                actual: desc.shape.clone(),
            });
        }
        Ok(())
    }

    /// All connected inputs have exactly the same shape.
    pub fn require_same_shape(&self) -> Result<(), NegotiationError> {
        let mut inputs = self.connected_inputs();
        let Some((first, first_desc)) = inputs.next() else {
            return Ok(());
        };
        for (other, desc) in inputs {
            if desc.shape != first_desc.shape {
                return Err(NegotiationError::InconsistentShapes {
                    first,
                    first_shape: first_desc.shape.clone(),
                    other,
                    other_shape: desc.shape.clone(),
                });
            }
        }
        Ok(())
    }

    /// All connected inputs have the same element type.
    pub fn require_same_dtype(&self) -> Result<(), NegotiationError> {
        let mut inputs = self.connected_inputs();
        let Some((first, first_desc)) = inputs.next() else {
            return Ok(());
        };
        for (other, desc) in inputs {
            if desc.dtype != first_desc.dtype {
                return Err(NegotiationError::InconsistentDTypes {
                    first,
                    first_dtype: first_desc.dtype,
                    other,
                    other_dtype: desc.dtype,
                });
            }
        }
        Ok(())
    }

    pub fn require_square(&self, port: u16) -> Result<(), NegotiationError> {
        let desc = self.input(port)?;
        match desc.shape.dims() {
            [rows, cols] if rows == cols => Ok(()),
            _ => Err(NegotiationError::NotSquare {
                port,
                actual: desc.shape.clone(),
            }),
        }
    }

    /// Inputs `left` and `right` are matrices with agreeing inner extents.
    pub fn require_matmul(&self, left: u16, right: u16) -> Result<(), NegotiationError> {
        let lhs = self.input(left)?;
        let rhs = self.input(right)?;
        match (lhs.shape.dims(), rhs.shape.dims()) {
            ([_, inner_l], [inner_r, _]) if inner_l == inner_r => Ok(()),
            _ => Err(NegotiationError::NotMultipliable {
                left,
                left_shape: lhs.shape.clone(),
                right,
                right_shape: rhs.shape.clone(),
            }),
        }
    }
}
