//! `clreduce`: parallel reduction of numeric buffers on an accelerator.
//!
//! A reduction runs in two phases. The accelerator splits the input into
//! execution groups and tree-reduces each group to one vector-wide partial
//! in local memory; the host then folds the downloaded partials into the
//! final scalar.
//!
//! | Operation | Kernel tag | Host seed           |
//! |-----------|------------|---------------------|
//! | Sum       | `OP_ADD`   | zero (widened)      |
//! | Product   | `OP_MUL`   | first partial       |
//! | Min       | `OP_MIN`   | kind's maximum      |
//! | Max       | `OP_MAX`   | kind's minimum      |
//!
//! Supported element types are `i16`, `i32`, `i64`, `f32` and `f64`, reduced
//! four lanes at a time. Input lengths must be a multiple of
//! [`INPUT_MULTIPLE`].
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use clreduce::{CpuQueue, CpuReferenceAccelerator, ReductionEngine, ReductionOperation};
//!
//! let accel = Arc::new(CpuReferenceAccelerator::new());
//! let engine = ReductionEngine::for_element::<i32>(accel, ReductionOperation::Sum).unwrap();
//! let input: Vec<i32> = (1..=1024).collect();
//! assert_eq!(engine.reduce_scalar(&CpuQueue::new(), &input).unwrap(), 524_800);
//! ```

pub mod accelerator;
pub mod cpu_reference;
pub mod element;
pub mod engine;
pub mod finalize;
pub mod kernels;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod partition;

pub use accelerator::{Accelerator, DispatchGeometry, MemAccess, ReduceArgs};
pub use clreduce_common::{
    ConfigError, ElementKind, NumericType, ReductionConfig, ReductionError, ReductionOperation,
    Result, ScalarValue, VECTOR_WIDTH,
};
pub use cpu_reference::{CpuQueue, CpuReferenceAccelerator, FailurePoint, QueueOp};
pub use element::Element;
pub use engine::ReductionEngine;
pub use finalize::{finalize, reduce_on_host};
pub use kernels::{KernelSpecialization, KernelTemplate};
#[cfg(feature = "opencl")]
pub use opencl::OpenClAccelerator;
pub use partition::{partition, WorkPartition, INPUT_MULTIPLE};
