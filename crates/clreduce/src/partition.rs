//! Work partitioning for the two-phase reduction.
//!
//! Every execution item loads two vectors (`input[i]` and `input[i + span]`),
//! so a buffer of `L` scalars needs `L / VECTOR_WIDTH / 2` live items. The
//! item count is rounded up to whole execution groups; items past the span
//! carry no value and are skipped by the in-group tree.

use clreduce_common::{ElementKind, ReductionError, Result, VECTOR_WIDTH};

/// Input lengths must be a multiple of this many scalars.
pub const INPUT_MULTIPLE: usize = VECTOR_WIDTH * 2;

/// Sizes for one reduction dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartition {
    /// Execution items per group.
    pub group_size: usize,
    /// Number of execution groups, and of partial results.
    pub groups: usize,
    /// Global dispatch size, `groups * group_size`.
    pub execution_items: usize,
    /// Local scratch buffer size in bytes.
    pub scratch_bytes: usize,
    /// Size of the partial-result buffer in bytes.
    pub output_bytes: usize,
    /// Input length in vectors.
    pub logical_elements: usize,
}

impl WorkPartition {
    /// Number of execution items that load a pair of vectors.
    pub fn span(&self) -> usize {
        self.logical_elements / 2
    }

    /// Live items in group `group`, i.e. those below [`Self::span`].
    pub fn live_items(&self, group: usize) -> usize {
        let base = group * self.group_size;
        self.span().saturating_sub(base).min(self.group_size)
    }
}

/// Round `value` up to the next multiple of `multiple`.
#[inline]
fn round_up(value: usize, multiple: usize) -> usize {
    let remainder = value % multiple;
    if remainder == 0 {
        value
    } else {
        value + multiple - remainder
    }
}

/// Compute the dispatch sizes for reducing `input_length` scalars of `kind`
/// with execution groups of `group_size` items.
///
/// # Errors
///
/// `InvalidInputSize` if `input_length` is zero or not a multiple of
/// [`INPUT_MULTIPLE`]; `InvalidGroupSize` if `group_size` is not a power of
/// two of at least 2.
pub fn partition(
    input_length: usize,
    group_size: usize,
    kind: ElementKind,
) -> Result<WorkPartition> {
    if input_length == 0 || input_length % INPUT_MULTIPLE != 0 {
        return Err(ReductionError::InvalidInputSize {
            length: input_length,
            multiple: INPUT_MULTIPLE,
        });
    }
    if group_size < 2 || !group_size.is_power_of_two() {
        return Err(ReductionError::InvalidGroupSize(group_size));
    }

    let logical_elements = input_length / VECTOR_WIDTH;
    let execution_items = round_up(logical_elements, group_size * 2) / 2;
    let groups = execution_items / group_size;

    Ok(WorkPartition {
        group_size,
        groups,
        execution_items,
        scratch_bytes: (group_size / 2) * kind.vector_bytes(),
        output_bytes: groups * kind.vector_bytes(),
        logical_elements,
    })
}

/// Turn the group size a device negotiated for the kernel into one the
/// in-group tree can halve: capped by `cap` (0 = no cap) and rounded down to
/// a power of two.
pub fn normalize_group_size(negotiated: usize, cap: usize) -> Result<usize> {
    let limited = if cap == 0 {
        negotiated
    } else {
        negotiated.min(cap)
    };
    if limited < 2 {
        return Err(ReductionError::InvalidGroupSize(limited));
    }
    Ok(1usize << limited.ilog2())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_exact_and_inexact() {
        assert_eq!(round_up(512, 64), 512);
        assert_eq!(round_up(513, 64), 576);
        assert_eq!(round_up(1, 64), 64);
    }

    #[test]
    fn thousand_ints_single_group() {
        // 1024 ints = 256 int4 vectors = 128 live items.
        let p = partition(1024, 256, ElementKind::Int32).unwrap();
        assert_eq!(p.logical_elements, 256);
        assert_eq!(p.execution_items, 256);
        assert_eq!(p.groups, 1);
        assert_eq!(p.scratch_bytes, 128 * 16);
        assert_eq!(p.output_bytes, 16);
        assert_eq!(p.span(), 128);
        assert_eq!(p.live_items(0), 128);
    }

    #[test]
    fn many_groups_exact_fit() {
        let p = partition(1024, 32, ElementKind::Int32).unwrap();
        assert_eq!(p.execution_items, 128);
        assert_eq!(p.groups, 4);
        assert_eq!(p.output_bytes, 4 * 16);
        assert!((0..p.groups).all(|g| p.live_items(g) == 32));
    }

    #[test]
    fn partial_last_group() {
        // 40 vectors -> span 20, groups of 8 -> 3 groups, last has 4 live items.
        let p = partition(160, 8, ElementKind::Float64).unwrap();
        assert_eq!(p.span(), 20);
        assert_eq!(p.groups, 3);
        assert_eq!(p.execution_items, 24);
        assert_eq!(p.live_items(2), 4);
        assert_eq!(p.scratch_bytes, 4 * 32);
    }

    #[test]
    fn smallest_input() {
        let p = partition(8, 256, ElementKind::Int16).unwrap();
        assert_eq!(p.logical_elements, 2);
        assert_eq!(p.groups, 1);
        assert_eq!(p.execution_items, 256);
        assert_eq!(p.live_items(0), 1);
        assert_eq!(p.output_bytes, 8);
    }

    #[test]
    fn rejects_indivisible_length() {
        let err = partition(12, 64, ElementKind::Int32).unwrap_err();
        assert_eq!(
            err,
            ReductionError::InvalidInputSize {
                length: 12,
                multiple: 8,
            }
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            partition(0, 64, ElementKind::Int32),
            Err(ReductionError::InvalidInputSize { length: 0, .. })
        ));
    }

    #[test]
    fn rejects_bad_group_sizes() {
        for gs in [0, 1, 3, 96] {
            assert_eq!(
                partition(64, gs, ElementKind::Int32).unwrap_err(),
                ReductionError::InvalidGroupSize(gs)
            );
        }
    }

    #[test]
    fn normalize_rounds_down_and_caps() {
        assert_eq!(normalize_group_size(1024, 0).unwrap(), 1024);
        assert_eq!(normalize_group_size(1024, 128).unwrap(), 128);
        assert_eq!(normalize_group_size(768, 0).unwrap(), 512);
        assert_eq!(normalize_group_size(2, 0).unwrap(), 2);
        assert_eq!(
            normalize_group_size(1, 0).unwrap_err(),
            ReductionError::InvalidGroupSize(1)
        );
    }
}
