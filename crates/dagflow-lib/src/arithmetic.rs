//! Element-wise arithmetic over any number of inputs.
//!
//! Both nodes grow a new input `input_{n}` per connection. Every input must
//! have the shape of `input_0`; the result takes the promoted dtype of all
//! inputs.

use dagflow_core::{
    ComputeContext, DataDescriptor, InputConstraint, InputStrategy, Kernel, KernelError, Layout,
    Negotiation, NegotiationError, ShapePattern,
};

fn elementwise_layout() -> Layout {
    Layout::new()
        .output("result")
        .strategy(InputStrategy::AddInput {
            prefix: "input".to_string(),
            constraint: Some(InputConstraint::any().shape(ShapePattern::SameAs(0))),
        })
}

fn elementwise_descriptor(ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
    let dtype = ctx.promoted_dtype()?;
    let shape = ctx.input(0)?.shape.clone();
    ctx.set_all_outputs(&DataDescriptor::new(dtype, shape));
    Ok(())
}

/// `result = input_0 + input_1 + ...`
#[derive(Debug, Default)]
pub struct Sum;

impl Kernel for Sum {
    fn kind(&self) -> &'static str {
        "Sum"
    }

    fn layout(&self) -> Layout {
        elementwise_layout()
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        elementwise_descriptor(ctx)
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        let inputs: Vec<_> = ctx.inputs().collect();
        let result = ctx.output(0)?;
        result.fill_zero();
        for input in inputs {
            result.add_assign(input)?;
        }
        Ok(())
    }
}

/// `result = input_0 * input_1 * ...`
#[derive(Debug, Default)]
pub struct Product;

impl Kernel for Product {
    fn kind(&self) -> &'static str {
        "Product"
    }

    fn layout(&self) -> Layout {
        elementwise_layout()
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        elementwise_descriptor(ctx)
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        let mut inputs = ctx.inputs();
        let first = inputs.next().ok_or(KernelError::MissingInput { port: 0 })?;
        let rest: Vec<_> = inputs.collect();
        let result = ctx.output(0)?;
        result.assign(first)?;
        for input in rest {
            result.mul_assign(input)?;
        }
        Ok(())
    }
}
