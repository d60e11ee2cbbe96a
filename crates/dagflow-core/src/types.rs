//! Data descriptors: the static "type" of everything flowing through a port.
//!
//! A [`DataDescriptor`] records the element type, the shape, and optional
//! semantic axis tags of an output. Descriptors are fixed during closing by
//! the negotiation pass and never change afterwards. Inputs may carry an
//! [`InputConstraint`] that the descriptor of their source must satisfy.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn is_integer(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Result type of combining two element types, numpy style.
    ///
    /// Same-kind operands widen to the larger width. Mixing integers with
    /// floats always yields `F64`, since `F32` cannot hold every `I32`.
    pub fn promote(self, other: DType) -> DType {
        match (self.is_float(), other.is_float()) {
            (false, false) | (true, true) => self.max(other),
            _ => DType::F64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A family of element types an input accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DTypeClass {
    /// Exactly this element type.
    Exact(DType),
    /// Any integer type.
    Integer,
    /// Any floating point type.
    Float,
    /// Any element type.
    Numeric,
}

impl DTypeClass {
    pub fn accepts(self, dtype: DType) -> bool {
        match self {
            DTypeClass::Exact(expected) => expected == dtype,
            DTypeClass::Integer => dtype.is_integer(),
            DTypeClass::Float => dtype.is_float(),
            DTypeClass::Numeric => true,
        }
    }
}

impl fmt::Display for DTypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DTypeClass::Exact(dtype) => write!(f, "{}", dtype),
            DTypeClass::Integer => f.write_str("integer"),
            DTypeClass::Float => f.write_str("float"),
            DTypeClass::Numeric => f.write_str("numeric"),
        }
    }
}

/// Array extents, outermost axis first. A rank-0 shape is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(pub SmallVec<[usize; 4]>);

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Shape(SmallVec::from_slice(dims))
    }

    pub fn scalar() -> Self {
        Shape(SmallVec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Views this shape at a lower `rank` by dropping leading unit axes.
    ///
    /// Returns `None` if the shape has fewer axes than `rank`, or if any of
    /// the dropped axes has an extent other than 1.
    pub fn squeezed_to(&self, rank: usize) -> Option<&[usize]> {
        let extra = self.rank().checked_sub(rank)?;
        let (lead, tail) = self.0.split_at(extra);
        lead.iter().all(|&d| d == 1).then_some(tail)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(&dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", dim)?;
        }
        if self.rank() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

/// One axis of a [`ShapePattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dim {
    Any,
    Fixed(usize),
}

/// Shape requirement of an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapePattern {
    Any,
    /// Any shape of the given rank.
    Rank(usize),
    /// Axis-by-axis requirement, e.g. `[Dim::Any]` for "1-D, any length".
    Dims(Vec<Dim>),
    /// Exactly the shape of the input at this port of the same node.
    SameAs(u16),
}

impl ShapePattern {
    /// "1-D, any length".
    pub fn vector() -> Self {
        ShapePattern::Dims(vec![Dim::Any])
    }

    pub fn exact(dims: &[usize]) -> Self {
        ShapePattern::Dims(dims.iter().map(|&d| Dim::Fixed(d)).collect())
    }

    /// Checks `shape` against this pattern. `reference` is the shape of the
    /// input named by [`ShapePattern::SameAs`], if that input is connected.
    pub fn matches(&self, shape: &Shape, reference: Option<&Shape>) -> bool {
        match self {
            ShapePattern::Any => true,
            ShapePattern::Rank(rank) => shape.squeezed_to(*rank).is_some(),
            ShapePattern::Dims(pattern) => match shape.squeezed_to(pattern.len()) {
                Some(dims) => pattern.iter().zip(dims).all(|(want, &got)| match want {
                    Dim::Any => true,
                    Dim::Fixed(n) => *n == got,
                }),
                None => false,
            },
            ShapePattern::SameAs(_) => reference.is_some_and(|r| r == shape),
        }
    }
}

impl fmt::Display for ShapePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapePattern::Any => f.write_str("any shape"),
            ShapePattern::Rank(rank) => write!(f, "rank {}", rank),
            ShapePattern::Dims(dims) => {
                f.write_str("(")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match dim {
                        Dim::Any => f.write_str("N")?,
                        Dim::Fixed(n) => write!(f, "{}", n)?,
                    }
                }
                if dims.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            ShapePattern::SameAs(port) => write!(f, "same shape as input {}", port),
        }
    }
}

/// The negotiated static description of an output's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDescriptor {
    pub dtype: DType,
    pub shape: Shape,
    /// Semantic axis tags, one per axis, or empty when untagged.
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub axes: SmallVec<[String; 2]>,
}

impl DataDescriptor {
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        DataDescriptor {
            dtype,
            shape: shape.into(),
            axes: SmallVec::new(),
        }
    }

    /// Attaches semantic axis tags.
    pub fn with_axes<I, S>(mut self, axes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes = axes.into_iter().map(Into::into).collect();
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }
}

impl fmt::Display for DataDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)?;
        if !self.axes.is_empty() {
            write!(f, " [{}]", self.axes.join(", "))?;
        }
        Ok(())
    }
}

/// What an input requires of the descriptor of its connected output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConstraint {
    pub dtype: DTypeClass,
    pub shape: ShapePattern,
    /// Required axis tags. `None` accepts any tagging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<Vec<String>>,
}

impl InputConstraint {
    pub fn any() -> Self {
        InputConstraint {
            dtype: DTypeClass::Numeric,
            shape: ShapePattern::Any,
            axes: None,
        }
    }

    pub fn dtype(mut self, dtype: DTypeClass) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn shape(mut self, shape: ShapePattern) -> Self {
        self.shape = shape;
        self
    }

    pub fn axes<I, S>(mut self, axes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes = Some(axes.into_iter().map(Into::into).collect());
        self
    }

    /// Returns `true` if `actual` satisfies every part of the constraint.
    pub fn accepts(&self, actual: &DataDescriptor, reference: Option<&Shape>) -> bool {
        if !self.dtype.accepts(actual.dtype) {
            return false;
        }
        if !self.shape.matches(&actual.shape, reference) {
            return false;
        }
        match &self.axes {
            Some(axes) => axes.iter().eq(actual.axes.iter()),
            None => true,
        }
    }
}

impl Default for InputConstraint {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for InputConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dtype, self.shape)?;
        if let Some(axes) = &self.axes {
            write!(f, " [{}]", axes.join(", "))?;
        }
        Ok(())
    }
}
