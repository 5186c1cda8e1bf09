//! Host element types accepted by the reduction engine.

use std::fmt;

use bytemuck::Pod;
use clreduce_common::{ElementKind, ReductionOperation, ScalarValue};

mod sealed {
    pub trait Sealed {}
}

/// A Rust scalar type with a matching [`ElementKind`].
///
/// Implemented for `i16`, `i32`, `i64`, `f32` and `f64`. Sealed: the kernel
/// template only knows these five types.
pub trait Element: Pod + PartialOrd + Send + Sync + fmt::Debug + sealed::Sealed {
    const KIND: ElementKind;

    fn into_scalar(self) -> ScalarValue;

    /// Extract a value of this type; `None` when the scalar has another kind.
    fn from_scalar(value: ScalarValue) -> Option<Self>;

    /// Combine two values the way the device kernel does: wrapping integer
    /// arithmetic, IEEE float arithmetic, `min`/`max` ignoring NaN.
    fn device_combine(op: ReductionOperation, a: Self, b: Self) -> Self;
}

macro_rules! impl_integer_element {
    ($ty:ty, $kind:ident) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;

            fn into_scalar(self) -> ScalarValue {
                ScalarValue::$kind(self)
            }

            fn from_scalar(value: ScalarValue) -> Option<Self> {
                match value {
                    ScalarValue::$kind(v) => Some(v),
                    _ => None,
                }
            }

            #[inline]
            fn device_combine(op: ReductionOperation, a: Self, b: Self) -> Self {
                match op {
                    ReductionOperation::Sum => a.wrapping_add(b),
                    ReductionOperation::Product => a.wrapping_mul(b),
                    ReductionOperation::Min => a.min(b),
                    ReductionOperation::Max => a.max(b),
                }
            }
        }
    };
}

macro_rules! impl_float_element {
    ($ty:ty, $kind:ident) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;

            fn into_scalar(self) -> ScalarValue {
                ScalarValue::$kind(self)
            }

            fn from_scalar(value: ScalarValue) -> Option<Self> {
                match value {
                    ScalarValue::$kind(v) => Some(v),
                    _ => None,
                }
            }

            #[inline]
            fn device_combine(op: ReductionOperation, a: Self, b: Self) -> Self {
                match op {
                    ReductionOperation::Sum => a + b,
                    ReductionOperation::Product => a * b,
                    ReductionOperation::Min => a.min(b),
                    ReductionOperation::Max => a.max(b),
                }
            }
        }
    };
}

impl_integer_element!(i16, Int16);
impl_integer_element!(i32, Int32);
impl_integer_element!(i64, Int64);
impl_float_element!(f32, Float32);
impl_float_element!(f64, Float64);

#[cfg(test)]
mod tests {
    use super::*;

    fn width_matches<T: Element>() -> bool {
        T::KIND.byte_width() == std::mem::size_of::<T>()
    }

    #[test]
    fn kinds_match_widths() {
        assert!(width_matches::<i16>());
        assert!(width_matches::<i32>());
        assert!(width_matches::<i64>());
        assert!(width_matches::<f32>());
        assert!(width_matches::<f64>());
    }

    #[test]
    fn scalar_extraction_checks_kind() {
        assert_eq!(i32::from_scalar(ScalarValue::Int32(7)), Some(7));
        assert_eq!(i32::from_scalar(ScalarValue::Int64(7)), None);
        assert_eq!(f64::from_scalar(5.0f64.into_scalar()), Some(5.0));
    }

    #[test]
    fn integer_device_arithmetic_wraps() {
        let sum = i16::device_combine(ReductionOperation::Sum, i16::MAX, 1);
        assert_eq!(sum, i16::MIN);
        let product = i32::device_combine(ReductionOperation::Product, 1 << 16, 1 << 16);
        assert_eq!(product, 0);
    }

    #[test]
    fn float_min_max() {
        let min = f32::device_combine(ReductionOperation::Min, 1.0, -2.0);
        assert_eq!(min, -2.0);
        let max = f64::device_combine(ReductionOperation::Max, 1.0, -2.0);
        assert_eq!(max, 1.0);
    }
}
