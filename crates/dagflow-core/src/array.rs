//! Runtime values carried by outputs.
//!
//! An [`Array`] is a dense, row-major buffer with a [`Shape`]. It is the only
//! value type the engine moves between nodes; kernels read input arrays and
//! write into the preallocated arrays of their own outputs.

use std::borrow::Cow;
use std::ops::{Add, Mul, Sub};

use num_traits::{AsPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::ArrayError;
use crate::types::{DType, DataDescriptor, Shape};

/// Typed element storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Buffer {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Buffer {
    pub fn dtype(&self) -> DType {
        match self {
            Buffer::I32(_) => DType::I32,
            Buffer::I64(_) => DType::I64,
            Buffer::F32(_) => DType::F32,
            Buffer::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::I32(v) => v.len(),
            Buffer::I64(v) => v.len(),
            Buffer::F32(v) => v.len(),
            Buffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::I32 => Buffer::I32(vec![0; len]),
            DType::I64 => Buffer::I64(vec![0; len]),
            DType::F32 => Buffer::F32(vec![0.0; len]),
            DType::F64 => Buffer::F64(vec![0.0; len]),
        }
    }
}

/// A primitive that can be stored in a [`Buffer`].
pub trait Element: Copy + Zero + PartialEq + std::fmt::Debug + 'static {
    const DTYPE: DType;

    fn into_buffer(values: Vec<Self>) -> Buffer;
    fn view(buffer: &Buffer) -> Option<&[Self]>;
    fn view_mut(buffer: &mut Buffer) -> Option<&mut [Self]>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_buffer(values: Vec<Self>) -> Buffer {
                Buffer::$variant(values)
            }

            fn view(buffer: &Buffer) -> Option<&[Self]> {
                match buffer {
                    Buffer::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn view_mut(buffer: &mut Buffer) -> Option<&mut [Self]> {
                match buffer {
                    Buffer::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(f32, F32);
impl_element!(f64, F64);

fn cast_slice<S, T>(src: &[S]) -> Vec<T>
where
    S: AsPrimitive<T>,
    T: Copy + 'static,
{
    src.iter().map(|v| v.as_()).collect()
}

macro_rules! cast_buffer {
    ($src:expr, $variant:ident) => {
        match $src {
            Buffer::I32(v) => Buffer::$variant(cast_slice(v)),
            Buffer::I64(v) => Buffer::$variant(cast_slice(v)),
            Buffer::F32(v) => Buffer::$variant(cast_slice(v)),
            Buffer::F64(v) => Buffer::$variant(cast_slice(v)),
        }
    };
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
}

fn apply<T>(lhs: &mut [T], rhs: &[T], op: BinaryOp)
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Mul<Output = T>,
{
    for (a, &b) in lhs.iter_mut().zip(rhs) {
        *a = match op {
            BinaryOp::Add => *a + b,
            BinaryOp::Sub => *a - b,
            BinaryOp::Mul => *a * b,
        };
    }
}

/// A dense n-dimensional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    shape: Shape,
    buffer: Buffer,
}

impl Array {
    /// Builds an array, checking that the buffer fills the shape exactly.
    pub fn new(shape: impl Into<Shape>, buffer: Buffer) -> Result<Self, ArrayError> {
        let shape = shape.into();
        if shape.size() != buffer.len() {
            return Err(ArrayError::SizeMismatch {
                shape,
                len: buffer.len(),
            });
        }
        Ok(Array { shape, buffer })
    }

    /// A one-dimensional array over `values`.
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        Array {
            shape: Shape::new(&[values.len()]),
            buffer: T::into_buffer(values),
        }
    }

    pub fn from_shape_vec<T: Element>(
        shape: impl Into<Shape>,
        values: Vec<T>,
    ) -> Result<Self, ArrayError> {
        Array::new(shape, T::into_buffer(values))
    }

    /// A zero-filled array matching `desc`.
    pub fn zeros(desc: &DataDescriptor) -> Self {
        Array {
            shape: desc.shape.clone(),
            buffer: Buffer::zeros(desc.dtype, desc.shape.size()),
        }
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns `true` if dtype and shape agree with `desc`.
    pub fn conforms_to(&self, desc: &DataDescriptor) -> bool {
        self.dtype() == desc.dtype && self.shape == desc.shape
    }

    /// Typed view of the elements, `None` if `T` is not the array's dtype.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(&self.buffer)
    }

    pub fn as_slice_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        T::view_mut(&mut self.buffer)
    }

    /// Converts every element to `dtype` with `as`-cast semantics.
    pub fn cast(&self, dtype: DType) -> Array {
        let buffer = match dtype {
            DType::I32 => cast_buffer!(&self.buffer, I32),
            DType::I64 => cast_buffer!(&self.buffer, I64),
            DType::F32 => cast_buffer!(&self.buffer, F32),
            DType::F64 => cast_buffer!(&self.buffer, F64),
        };
        Array {
            shape: self.shape.clone(),
            buffer,
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self.cast(DType::F64).buffer {
            Buffer::F64(values) => values,
            _ => Vec::new(),
        }
    }

    pub fn fill_zero(&mut self) {
        self.buffer = Buffer::zeros(self.dtype(), self.len());
    }

    /// Copies `other` into this array, converting to this array's dtype.
    /// Keeps this array's shape; only the element counts must agree.
    pub fn assign(&mut self, other: &Array) -> Result<(), ArrayError> {
        self.check_len(other)?;
        self.buffer = other.cast(self.dtype()).buffer;
        Ok(())
    }

    pub fn add_assign(&mut self, other: &Array) -> Result<(), ArrayError> {
        self.zip_with(other, BinaryOp::Add)
    }

    pub fn sub_assign(&mut self, other: &Array) -> Result<(), ArrayError> {
        self.zip_with(other, BinaryOp::Sub)
    }

    pub fn mul_assign(&mut self, other: &Array) -> Result<(), ArrayError> {
        self.zip_with(other, BinaryOp::Mul)
    }

    fn check_len(&self, other: &Array) -> Result<(), ArrayError> {
        if self.len() != other.len() {
            return Err(ArrayError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        Ok(())
    }

    fn zip_with(&mut self, other: &Array, op: BinaryOp) -> Result<(), ArrayError> {
        self.check_len(other)?;
        let rhs = if other.dtype() == self.dtype() {
            Cow::Borrowed(other)
        } else {
            Cow::Owned(other.cast(self.dtype()))
        };
        match (&mut self.buffer, &rhs.buffer) {
            (Buffer::I32(a), Buffer::I32(b)) => apply(a, b, op),
            (Buffer::I64(a), Buffer::I64(b)) => apply(a, b, op),
            (Buffer::F32(a), Buffer::F32(b)) => apply(a, b, op),
            (Buffer::F64(a), Buffer::F64(b)) => apply(a, b, op),
            (lhs, rhs) => {
                return Err(ArrayError::DTypeMismatch {
                    expected: lhs.dtype(),
                    actual: rhs.dtype(),
                })
            }
        }
        Ok(())
    }
}

impl<T: Element> From<Vec<T>> for Array {
    fn from(values: Vec<T>) -> Self {
        Array::from_vec(values)
    }
}
