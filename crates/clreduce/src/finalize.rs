//! Host-side combination of per-group partial results.
//!
//! The device leaves one vector-wide partial per execution group. The host
//! reads the whole buffer back as a flat scalar sequence and folds it with
//! the engine's operation. Sums and products accumulate in a widened type
//! (`i64` for integral kinds, `f64` for floating kinds) and are narrowed once
//! at the end.

use clreduce_common::{
    ElementKind, FoldSeed, ReductionError, ReductionOperation, Result, ScalarValue,
};

use crate::element::Element;

/// Widening accumulator for one element type.
trait HostFold: Element {
    type Wide: Copy;

    const LOWEST: Self;
    const HIGHEST: Self;
    const ZERO: Self::Wide;

    fn widen(self) -> Self::Wide;
    fn narrow(wide: Self::Wide) -> Self;
    fn add(a: Self::Wide, b: Self::Wide) -> Self::Wide;
    fn mul(a: Self::Wide, b: Self::Wide) -> Self::Wide;
}

macro_rules! impl_integer_fold {
    ($ty:ty) => {
        impl HostFold for $ty {
            type Wide = i64;

            const LOWEST: Self = <$ty>::MIN;
            const HIGHEST: Self = <$ty>::MAX;
            const ZERO: i64 = 0;

            #[inline]
            fn widen(self) -> i64 {
                i64::from(self)
            }
            #[inline]
            fn narrow(wide: i64) -> Self {
                wide as $ty
            }
            #[inline]
            fn add(a: i64, b: i64) -> i64 {
                a.wrapping_add(b)
            }
            #[inline]
            fn mul(a: i64, b: i64) -> i64 {
                a.wrapping_mul(b)
            }
        }
    };
}

macro_rules! impl_float_fold {
    ($ty:ty) => {
        impl HostFold for $ty {
            type Wide = f64;

            const LOWEST: Self = <$ty>::MIN;
            const HIGHEST: Self = <$ty>::MAX;
            const ZERO: f64 = 0.0;

            #[inline]
            fn widen(self) -> f64 {
                f64::from(self)
            }
            #[inline]
            fn narrow(wide: f64) -> Self {
                wide as $ty
            }
            #[inline]
            fn add(a: f64, b: f64) -> f64 {
                a + b
            }
            #[inline]
            fn mul(a: f64, b: f64) -> f64 {
                a * b
            }
        }
    };
}

impl_integer_fold!(i16);
impl_integer_fold!(i32);
impl_integer_fold!(i64);
impl_float_fold!(f32);
impl_float_fold!(f64);

fn fold<T: HostFold>(op: ReductionOperation, partials: &[u8]) -> Result<T> {
    let width = std::mem::size_of::<T>();
    if partials.is_empty() || partials.len() % width != 0 {
        return Err(ReductionError::MalformedPartials {
            bytes: partials.len(),
            width,
        });
    }
    let mut values = partials
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned::<T>);

    let result = match op.seed() {
        FoldSeed::Zero => T::narrow(values.fold(T::ZERO, |acc, v| T::add(acc, v.widen()))),
        FoldSeed::First => {
            // Non-empty was checked above.
            let first = values.next().map_or(T::ZERO, |v| v.widen());
            T::narrow(values.fold(first, |acc, v| T::mul(acc, v.widen())))
        }
        FoldSeed::Highest => values.fold(T::HIGHEST, |acc, v| if v < acc { v } else { acc }),
        FoldSeed::Lowest => values.fold(T::LOWEST, |acc, v| if v > acc { v } else { acc }),
    };
    Ok(result)
}

/// Fold raw partial results into one scalar of `kind`.
///
/// The bytes are only borrowed, so the caller may inspect them again from the
/// start afterwards.
///
/// # Errors
///
/// `MalformedPartials` if `partials` is empty or not a whole number of
/// `kind` scalars.
pub fn finalize(
    op: ReductionOperation,
    partials: &[u8],
    kind: ElementKind,
) -> Result<ScalarValue> {
    Ok(match kind {
        ElementKind::Int16 => ScalarValue::Int16(fold(op, partials)?),
        ElementKind::Int32 => ScalarValue::Int32(fold(op, partials)?),
        ElementKind::Int64 => ScalarValue::Int64(fold(op, partials)?),
        ElementKind::Float32 => ScalarValue::Float32(fold(op, partials)?),
        ElementKind::Float64 => ScalarValue::Float64(fold(op, partials)?),
    })
}

/// Reduce `values` entirely on the host with the same accumulation rules as
/// [`finalize`]. Used to validate accelerator results.
pub fn reduce_on_host<T: Element>(op: ReductionOperation, values: &[T]) -> Result<ScalarValue> {
    finalize(op, bytemuck::cast_slice(values), T::KIND)
}
