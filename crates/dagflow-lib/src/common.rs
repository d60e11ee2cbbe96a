//! Sources and pass-through nodes.

use dagflow_core::{
    Array as Values, ArrayError, ComputeContext, DataDescriptor, InputStrategy, Kernel,
    KernelError, Layout, Negotiation, NegotiationError,
};

/// Source node holding a fixed-shape array, published on output `"array"`.
///
/// The descriptor is taken from the initial values. Later calls to
/// [`Array::set`] may change the values but never the shape or dtype, so a
/// closed graph stays valid.
#[derive(Debug)]
pub struct Array {
    values: Values,
}

impl Array {
    pub fn new(values: impl Into<Values>) -> Self {
        Array {
            values: values.into(),
        }
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn descriptor(&self) -> DataDescriptor {
        DataDescriptor::new(self.values.dtype(), self.values.shape().clone())
    }

    /// Replaces the held values, converting to the held dtype.
    ///
    /// Fails if `values` has a different shape.
    pub fn set(&mut self, values: &Values) -> Result<(), ArrayError> {
        if values.shape() != self.values.shape() {
            return Err(ArrayError::ShapeMismatch {
                expected: self.values.shape().clone(),
                actual: values.shape().clone(),
            });
        }
        self.values.assign(values)
    }
}

impl Kernel for Array {
    fn kind(&self) -> &'static str {
        "Array"
    }

    fn layout(&self) -> Layout {
        Layout::new().output("array")
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.set_all_outputs(&self.descriptor());
        Ok(())
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        ctx.output(0)?.assign(&self.values)?;
        Ok(())
    }
}

/// Copies input `input_{n}` to output `result_{n}`, one pair per connection.
#[derive(Debug, Default)]
pub struct Copy;

impl Kernel for Copy {
    fn kind(&self) -> &'static str {
        "Copy"
    }

    fn layout(&self) -> Layout {
        Layout::new().strategy(InputStrategy::add_input_and_output("input", "result"))
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.copy_inputs_pairwise()
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        for port in 0..ctx.input_count() as u16 {
            let input = ctx.input(port)?;
            ctx.output(port)?.assign(input)?;
        }
        Ok(())
    }
}
