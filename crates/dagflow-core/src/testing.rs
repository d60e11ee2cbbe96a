//! Small kernels shared by the unit tests.

use crate::array::Array;
use crate::error::{KernelError, NegotiationError};
use crate::negotiate::Negotiation;
use crate::node::{ComputeContext, InputStrategy, Kernel, Layout};
use crate::types::{DType, DataDescriptor, Shape};

/// Emits fixed f64 values on output `"out"`.
#[derive(Debug)]
pub struct Source {
    pub shape: Shape,
    pub values: Vec<f64>,
}

impl Source {
    pub fn new(values: Vec<f64>) -> Self {
        Source {
            shape: Shape::new(&[values.len()]),
            values,
        }
    }

    pub fn shaped(shape: &[usize], values: Vec<f64>) -> Self {
        Source {
            shape: Shape::new(shape),
            values,
        }
    }
}

impl Kernel for Source {
    fn kind(&self) -> &'static str {
        "Source"
    }

    fn layout(&self) -> Layout {
        Layout::new().output("out")
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.set_all_outputs(&DataDescriptor::new(DType::F64, self.shape.clone()));
        Ok(())
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        let values = Array::from_shape_vec(self.shape.clone(), self.values.clone())?;
        ctx.output(0)?.assign(&values)?;
        Ok(())
    }
}

/// Element-wise sum of any number of inputs, grown with prefix `"x"`.
#[derive(Debug)]
pub struct Add;

impl Kernel for Add {
    fn kind(&self) -> &'static str {
        "Add"
    }

    fn layout(&self) -> Layout {
        Layout::new()
            .output("out")
            .strategy(InputStrategy::add_input("x"))
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.require_same_shape()?;
        let dtype = ctx.promoted_dtype()?;
        let shape = ctx.input(0)?.shape.clone();
        ctx.set_all_outputs(&DataDescriptor::new(dtype, shape));
        Ok(())
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        let inputs: Vec<&Array> = ctx.inputs().collect();
        let out = ctx.output(0)?;
        out.fill_zero();
        for input in inputs {
            out.add_assign(input)?;
        }
        Ok(())
    }
}

/// Multiplies its single input by `factor`.
#[derive(Debug)]
pub struct Scale {
    pub factor: f64,
}

impl Kernel for Scale {
    fn kind(&self) -> &'static str {
        "Scale"
    }

    fn layout(&self) -> Layout {
        Layout::new().input("in").output("out")
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.copy_input_to_outputs(0)
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        let input = ctx.input(0)?;
        let out = ctx.output(0)?;
        out.assign(input)?;
        if let Some(values) = out.as_slice_mut::<f64>() {
            for v in values {
                *v *= self.factor;
            }
        }
        Ok(())
    }
}

/// Copies its input, or fails while `fail` is set.
#[derive(Debug)]
pub struct Flaky {
    pub fail: bool,
}

impl Kernel for Flaky {
    fn kind(&self) -> &'static str {
        "Flaky"
    }

    fn layout(&self) -> Layout {
        Layout::new().input("in").output("out")
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.copy_input_to_outputs(0)
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        if self.fail {
            return Err(KernelError::failed("flaky kernel failed"));
        }
        let input = ctx.input(0)?;
        ctx.output(0)?.assign(input)?;
        Ok(())
    }
}

/// Source with two independent outputs, `"left"` and `"right"`.
#[derive(Debug)]
pub struct Pair {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
}

impl Kernel for Pair {
    fn kind(&self) -> &'static str {
        "Pair"
    }

    fn layout(&self) -> Layout {
        Layout::new().output("left").output("right")
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.set_output(0, DataDescriptor::new(DType::F64, [self.left.len()]))?;
        ctx.set_output(1, DataDescriptor::new(DType::F64, [self.right.len()]))
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        ctx.output(0)?.assign(&Array::from_vec(self.left.clone()))?;
        ctx.output(1)?.assign(&Array::from_vec(self.right.clone()))?;
        Ok(())
    }
}
