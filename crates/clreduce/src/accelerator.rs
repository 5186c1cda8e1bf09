//! The accelerator seam consumed by [`ReductionEngine`](crate::ReductionEngine).
//!
//! An accelerator compiles the reduction template, owns device memory and
//! executes commands on an in-order queue. Two implementations ship with the
//! crate: [`CpuReferenceAccelerator`](crate::CpuReferenceAccelerator), which
//! emulates the device kernel on the host, and `OpenClAccelerator` (feature
//! `opencl`).

use clreduce_common::Result;

use crate::kernels::{KernelSpecialization, KernelTemplate};

/// Device-side access mode of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    /// Kernel reads only; the host uploads into it.
    ReadOnly,
    /// Kernel writes only; the host downloads from it.
    WriteOnly,
}

/// Arguments bound to the `reduce` entry point, in parameter order.
#[derive(Debug)]
pub struct ReduceArgs<'a, B> {
    pub input: &'a B,
    pub output: &'a mut B,
    /// Size of the local scratch allocation in bytes.
    pub scratch_bytes: usize,
    /// Number of execution items that load a pair of vectors.
    pub span: u32,
}

/// One-dimensional dispatch shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGeometry {
    /// Total execution items; a multiple of `local`.
    pub global: usize,
    /// Execution items per group.
    pub local: usize,
}

impl DispatchGeometry {
    pub fn groups(&self) -> usize {
        self.global / self.local
    }
}

/// Compute device able to run the specialized reduction template.
///
/// Queues are in-order: a non-blocking upload followed by a dispatch on the
/// same queue is observed by the dispatch. Data passed to a non-blocking
/// upload must stay alive until a later blocking command or
/// [`finish`](Self::finish) on that queue returns.
pub trait Accelerator: Send + Sync {
    /// Compiled, specialized kernel.
    type Kernel: Send;
    /// Device memory allocation.
    type Buffer;
    /// In-order command queue.
    type Queue;

    /// Human-readable device name, for logs.
    fn device_name(&self) -> String;

    /// Build `template` with the defines of `specialization`.
    ///
    /// Fails with `KernelCompilationFailed` carrying the build log.
    fn compile(
        &self,
        template: &KernelTemplate,
        specialization: &KernelSpecialization,
    ) -> Result<Self::Kernel>;

    /// Largest group size the device accepts for `kernel`.
    fn max_group_size(&self, kernel: &Self::Kernel, queue: &Self::Queue) -> Result<usize>;

    fn allocate(&self, access: MemAccess, bytes: usize) -> Result<Self::Buffer>;

    fn enqueue_upload(
        &self,
        queue: &Self::Queue,
        buffer: &mut Self::Buffer,
        data: &[u8],
        blocking: bool,
    ) -> Result<()>;

    fn enqueue_dispatch(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        args: ReduceArgs<'_, Self::Buffer>,
        geometry: DispatchGeometry,
    ) -> Result<()>;

    fn enqueue_download(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        out: &mut [u8],
        blocking: bool,
    ) -> Result<()>;

    /// Block until every command enqueued on `queue` has completed.
    fn finish(&self, queue: &Self::Queue) -> Result<()>;

    fn release_buffer(&self, buffer: Self::Buffer);

    fn release_kernel(&self, kernel: Self::Kernel);
}
