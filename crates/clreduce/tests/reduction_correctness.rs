//! End-to-end reductions on the CPU reference accelerator.

use std::sync::Arc;

use clreduce::{
    CpuQueue, CpuReferenceAccelerator, ElementKind, NumericType, ReductionEngine, ReductionError,
    ReductionOperation,
};

fn engine_for<T: clreduce::Element>(
    op: ReductionOperation,
) -> ReductionEngine<CpuReferenceAccelerator> {
    ReductionEngine::for_element::<T>(Arc::new(CpuReferenceAccelerator::new()), op).unwrap()
}

// ── known values ─────────────────────────────────────────────────

#[test]
fn sum_of_one_to_1024() {
    let engine = engine_for::<i32>(ReductionOperation::Sum);
    let input: Vec<i32> = (1..=1024).collect();
    let mut out = [0i32];
    engine.reduce(&CpuQueue::new(), &input, &mut out).unwrap();
    assert_eq!(out[0], 524_800);
}

#[test]
fn max_and_min_find_injected_floats() {
    let mut input: Vec<f32> = (0..512).map(|i| (i as f32).sin() * 1000.0).collect();
    input[37] = 1.0e9;
    input[481] = -1.0e9;
    let queue = CpuQueue::new();

    let max = engine_for::<f32>(ReductionOperation::Max);
    assert_eq!(max.reduce_scalar(&queue, &input).unwrap(), 1.0e9);

    let min = engine_for::<f32>(ReductionOperation::Min);
    assert_eq!(min.reduce_scalar(&queue, &input).unwrap(), -1.0e9);
}

#[test]
fn max_of_all_negative_values() {
    let input = vec![-2.5f64; 64];
    let engine = engine_for::<f64>(ReductionOperation::Max);
    let queue = CpuQueue::new();
    assert_eq!(engine.reduce_scalar(&queue, &input).unwrap(), -2.5);
}

#[test]
fn product_of_sixteen_twos() {
    let engine = engine_for::<i32>(ReductionOperation::Product);
    let mut out = [0i32];
    engine.reduce(&CpuQueue::new(), &[2i32; 16], &mut out).unwrap();
    assert_eq!(out[0], 65_536);
}

#[test]
fn short_sum_spanning_many_groups() {
    let accel = Arc::new(CpuReferenceAccelerator::builder().max_group_size(8).build());
    let engine = ReductionEngine::for_element::<i16>(accel, ReductionOperation::Sum).unwrap();
    let input = vec![1i16; 4096];
    let queue = CpuQueue::new();
    assert_eq!(engine.reduce_scalar(&queue, &input).unwrap(), 4096);
}

#[test]
fn long_min_with_extremes() {
    let mut input: Vec<i64> = (0..256).map(|i| i * 1_000_000_007).collect();
    input[100] = i64::MIN;
    let engine = engine_for::<i64>(ReductionOperation::Min);
    let queue = CpuQueue::new();
    assert_eq!(engine.reduce_scalar(&queue, &input).unwrap(), i64::MIN);
}

#[test]
fn float_sum_matches_exact_total() {
    let input: Vec<f64> = (1..=2048).map(f64::from).collect();
    let engine = engine_for::<f64>(ReductionOperation::Sum);
    let total = engine.reduce_scalar(&CpuQueue::new(), &input).unwrap();
    assert_eq!(total, 2048.0 * 2049.0 / 2.0);
}

// ── calling contract ─────────────────────────────────────────────

#[test]
fn repeated_calls_are_bit_identical() {
    let input: Vec<f32> = (0..1024).map(|i| 1.0 / (i as f32 + 1.0)).collect();
    let engine = engine_for::<f32>(ReductionOperation::Sum);
    let queue = CpuQueue::new();
    let mut first = [0f32];
    let mut second = [0f32];
    engine.reduce(&queue, &input, &mut first).unwrap();
    engine.reduce(&queue, &input, &mut second).unwrap();
    assert_eq!(first[0].to_bits(), second[0].to_bits());
}

#[test]
fn divisibility_is_enforced() {
    let engine = engine_for::<i32>(ReductionOperation::Sum);
    let queue = CpuQueue::new();
    for len in [0usize, 4, 12, 1020, 1025] {
        let input = vec![1i32; len];
        let mut out = [-1i32];
        let err = engine.reduce(&queue, &input, &mut out).unwrap_err();
        assert_eq!(
            err,
            ReductionError::InvalidInputSize {
                length: len,
                multiple: 8,
            }
        );
        assert_eq!(out, [-1], "output modified for length {len}");
    }
    for len in [8usize, 16, 1024, 1032] {
        let total = engine.reduce_scalar(&queue, &vec![1i32; len]).unwrap();
        assert_eq!(total, len as i32);
    }
}

#[test]
fn mismatched_output_kind_is_rejected_without_dispatch() {
    let accel = Arc::new(CpuReferenceAccelerator::new());
    let engine =
        ReductionEngine::create(accel.clone(), ReductionOperation::Sum, NumericType::Int32)
            .unwrap();
    let queue = CpuQueue::new();
    let mut out = [0f64];
    let err = engine.reduce(&queue, &[1.0f64; 16], &mut out).unwrap_err();
    assert_eq!(
        err,
        ReductionError::ElementKindMismatch {
            expected: ElementKind::Int32,
            actual: ElementKind::Float64,
        }
    );
    assert_eq!(accel.dispatch_count(), 0);
    assert_eq!(accel.live_buffers(), 0);
    assert!(queue.ops().is_empty());
}

#[test]
fn released_engine_fails_fast() {
    let accel = Arc::new(CpuReferenceAccelerator::new());
    let engine =
        ReductionEngine::for_element::<i32>(accel.clone(), ReductionOperation::Max).unwrap();
    assert!(!engine.is_released());
    engine.release();
    assert!(engine.is_released());

    let queue = CpuQueue::new();
    let err = engine.reduce_scalar(&queue, &[1i32; 8]).unwrap_err();
    assert_eq!(err, ReductionError::EngineReleased);
    assert!(queue.ops().is_empty());
    assert_eq!(accel.dispatch_count(), 0);
}

#[test]
fn engine_reports_its_configuration() {
    let engine = engine_for::<i16>(ReductionOperation::Product);
    assert_eq!(engine.operation(), ReductionOperation::Product);
    assert_eq!(engine.element_kind(), ElementKind::Int16);
}

#[test]
fn engine_is_shareable_across_threads() {
    let engine = Arc::new(engine_for::<i32>(ReductionOperation::Sum));
    let handles: Vec<_> = (0..4i32)
        .map(|t| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let input = vec![t + 1; 512];
                engine.reduce_scalar(&CpuQueue::new(), &input).unwrap()
            })
        })
        .collect();
    let totals: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(totals, vec![512, 1024, 1536, 2048]);
}
