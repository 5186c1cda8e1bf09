//! Element kinds, reduction operations and scalar values.
//!
//! The reduction kernel is specialized for exactly one `(ElementKind,
//! ReductionOperation)` pair. Both the device-side specialization and the
//! host-side finalizer read the operation through [`ReductionOperation::descriptor`],
//! so the two dispatches cannot drift apart.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReductionError;

/// Number of scalars packed into one vector lane processed by the kernel.
pub const VECTOR_WIDTH: usize = 4;

// ---------------------------------------------------------------------------
// Numeric types
// ---------------------------------------------------------------------------

/// A numeric type a caller may request a reduction over.
///
/// Only a subset of these has an [`ElementKind`]; the rest are rejected at
/// engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl NumericType {
    /// OpenCL C scalar name.
    pub fn cl_name(self) -> &'static str {
        match self {
            Self::Int8 => "char",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cl_name())
    }
}

// ---------------------------------------------------------------------------
// Element kinds
// ---------------------------------------------------------------------------

/// A numeric element representation the reduction kernel supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ElementKind {
    /// All supported kinds.
    pub const ALL: &'static [ElementKind] = &[
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Float32,
        Self::Float64,
    ];

    /// Width of one scalar in bytes.
    pub const fn byte_width(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// OpenCL C scalar type name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }

    /// OpenCL C vector type name for [`VECTOR_WIDTH`] lanes, e.g. `int4`.
    pub fn vector_type(self) -> String {
        format!("{}{}", self.name(), VECTOR_WIDTH)
    }

    /// Width of one vector lane group in bytes.
    pub const fn vector_bytes(self) -> usize {
        self.byte_width() * VECTOR_WIDTH
    }

    /// Whether kernels over this kind need the double-precision extension.
    pub const fn needs_extended_precision(self) -> bool {
        matches!(self, Self::Float64)
    }
}

impl TryFrom<NumericType> for ElementKind {
    type Error = ReductionError;

    fn try_from(ty: NumericType) -> Result<Self, Self::Error> {
        match ty {
            NumericType::Int16 => Ok(Self::Int16),
            NumericType::Int32 => Ok(Self::Int32),
            NumericType::Int64 => Ok(Self::Int64),
            NumericType::Float32 => Ok(Self::Float32),
            NumericType::Float64 => Ok(Self::Float64),
            NumericType::Int8 => Err(ReductionError::UnsupportedElementKind(ty)),
        }
    }
}

impl From<ElementKind> for NumericType {
    fn from(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Int16 => Self::Int16,
            ElementKind::Int32 => Self::Int32,
            ElementKind::Int64 => Self::Int64,
            ElementKind::Float32 => Self::Float32,
            ElementKind::Float64 => Self::Float64,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Reduction operations
// ---------------------------------------------------------------------------

/// Associative operation applied by a reduction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionOperation {
    Sum,
    Product,
    Min,
    Max,
}

/// Initial accumulator of the host-side fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldSeed {
    /// Additive identity.
    Zero,
    /// The first partial value; the fold starts at the second.
    First,
    /// Largest representable value of the element kind.
    Highest,
    /// Smallest (most negative) representable value of the element kind.
    Lowest,
}

/// Everything both dispatch sites need to know about one operation.
#[derive(Debug)]
pub struct OperationDescriptor {
    pub operation: ReductionOperation,
    pub name: &'static str,
    /// Preprocessor define selecting the operation in the kernel template.
    pub kernel_tag: &'static str,
    pub seed: FoldSeed,
}

static DESCRIPTORS: [OperationDescriptor; 4] = [
    OperationDescriptor {
        operation: ReductionOperation::Sum,
        name: "sum",
        kernel_tag: "OP_ADD",
        seed: FoldSeed::Zero,
    },
    OperationDescriptor {
        operation: ReductionOperation::Product,
        name: "product",
        kernel_tag: "OP_MUL",
        seed: FoldSeed::First,
    },
    OperationDescriptor {
        operation: ReductionOperation::Min,
        name: "min",
        kernel_tag: "OP_MIN",
        seed: FoldSeed::Highest,
    },
    OperationDescriptor {
        operation: ReductionOperation::Max,
        name: "max",
        kernel_tag: "OP_MAX",
        seed: FoldSeed::Lowest,
    },
];

impl ReductionOperation {
    pub const ALL: &'static [ReductionOperation] =
        &[Self::Sum, Self::Product, Self::Min, Self::Max];

    pub fn descriptor(self) -> &'static OperationDescriptor {
        let idx = match self {
            Self::Sum => 0,
            Self::Product => 1,
            Self::Min => 2,
            Self::Max => 3,
        };
        &DESCRIPTORS[idx]
    }

    pub fn kernel_tag(self) -> &'static str {
        self.descriptor().kernel_tag
    }

    pub fn seed(self) -> FoldSeed {
        self.descriptor().seed
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

impl fmt::Display for ReductionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReductionOperation {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sum" | "add" => Ok(Self::Sum),
            "product" | "prod" | "mul" => Ok(Self::Product),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(ReductionError::UnknownOperation(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Scalar values
// ---------------------------------------------------------------------------

/// A single reduced value tagged with its element kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl ScalarValue {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Int16(_) => ElementKind::Int16,
            Self::Int32(_) => ElementKind::Int32,
            Self::Int64(_) => ElementKind::Int64,
            Self::Float32(_) => ElementKind::Float32,
            Self::Float64(_) => ElementKind::Float64,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_widths() {
        assert_eq!(ElementKind::Int16.byte_width(), 2);
        assert_eq!(ElementKind::Int32.byte_width(), 4);
        assert_eq!(ElementKind::Int64.byte_width(), 8);
        assert_eq!(ElementKind::Float32.byte_width(), 4);
        assert_eq!(ElementKind::Float64.byte_width(), 8);
    }

    #[test]
    fn vector_type_names() {
        assert_eq!(ElementKind::Int16.vector_type(), "short4");
        assert_eq!(ElementKind::Int32.vector_type(), "int4");
        assert_eq!(ElementKind::Int64.vector_type(), "long4");
        assert_eq!(ElementKind::Float32.vector_type(), "float4");
        assert_eq!(ElementKind::Float64.vector_type(), "double4");
    }

    #[test]
    fn only_double_needs_extended_precision() {
        for &kind in ElementKind::ALL {
            assert_eq!(
                kind.needs_extended_precision(),
                kind == ElementKind::Float64,
                "{kind}"
            );
        }
    }

    #[test]
    fn int8_is_rejected() {
        let err = ElementKind::try_from(NumericType::Int8).unwrap_err();
        assert_eq!(
            err,
            ReductionError::UnsupportedElementKind(NumericType::Int8)
        );
    }

    #[test]
    fn supported_numeric_types_round_trip() {
        for &kind in ElementKind::ALL {
            let ty = NumericType::from(kind);
            assert_eq!(ElementKind::try_from(ty).unwrap(), kind);
            assert_eq!(ty.cl_name(), kind.name());
        }
    }

    #[test]
    fn descriptor_table_is_indexed_by_operation() {
        for &op in ReductionOperation::ALL {
            assert_eq!(op.descriptor().operation, op);
        }
    }

    #[test]
    fn kernel_tags_are_distinct() {
        let mut tags: Vec<_> = ReductionOperation::ALL
            .iter()
            .map(|op| op.kernel_tag())
            .collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), 4);
    }

    #[test]
    fn seeds() {
        assert_eq!(ReductionOperation::Sum.seed(), FoldSeed::Zero);
        assert_eq!(ReductionOperation::Product.seed(), FoldSeed::First);
        assert_eq!(ReductionOperation::Min.seed(), FoldSeed::Highest);
        assert_eq!(ReductionOperation::Max.seed(), FoldSeed::Lowest);
    }

    #[test]
    fn parse_operation_names() {
        let cases = [
            ("SUM", ReductionOperation::Sum),
            ("add", ReductionOperation::Sum),
            ("mul", ReductionOperation::Product),
            ("Min", ReductionOperation::Min),
            ("max", ReductionOperation::Max),
        ];
        for (name, op) in cases {
            assert_eq!(name.parse::<ReductionOperation>().unwrap(), op, "{name}");
        }
    }

    #[test]
    fn parse_unknown_operation() {
        let err = "avg".parse::<ReductionOperation>().unwrap_err();
        assert_eq!(err, ReductionError::UnknownOperation("avg".into()));
    }

    #[test]
    fn scalar_kind_and_display() {
        assert_eq!(ScalarValue::Int32(524_800).kind(), ElementKind::Int32);
        assert_eq!(ScalarValue::Int32(524_800).to_string(), "524800");
        assert_eq!(ScalarValue::Float64(-1.5).to_string(), "-1.5");
    }
}
