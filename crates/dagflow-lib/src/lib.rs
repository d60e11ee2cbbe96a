//! Reference node library for dagflow.
//!
//! A handful of kernels written purely against the public
//! [`Kernel`](dagflow_core::Kernel) contract: a settable [`Array`] source,
//! element-wise [`Sum`] and [`Product`], and a pass-through [`Copy`].

pub mod arithmetic;
pub mod common;

pub use arithmetic::{Product, Sum};
pub use common::{Array, Copy};
