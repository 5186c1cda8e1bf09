//! Host emulation of the reduction kernel.
//!
//! [`CpuReferenceAccelerator`] runs `reduce.cl` group by group on the host
//! with the same scratch layout, live-item tracking and barrier steps as the
//! device code. It also records every queue command and tracks outstanding
//! buffers, which makes it the backend for tests and benchmarks on machines
//! without an OpenCL runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use clreduce_common::{ElementKind, ReductionError, ReductionOperation, Result, VECTOR_WIDTH};
use tracing::{debug, trace};

use crate::accelerator::{Accelerator, DispatchGeometry, MemAccess, ReduceArgs};
use crate::element::Element;
use crate::kernels::{KernelSpecialization, KernelTemplate, REDUCE_ENTRY_POINT};

/// Default work-group limit, matching common desktop GPUs.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 256;

/// Queue command as recorded by [`CpuQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    Upload {
        bytes: usize,
        blocking: bool,
    },
    Dispatch {
        global: usize,
        local: usize,
        scratch_bytes: usize,
        span: u32,
    },
    Download {
        bytes: usize,
        blocking: bool,
    },
    /// Wait for all earlier commands.
    Finish,
}

/// Queue stage at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Upload,
    Dispatch,
    Download,
}

/// In-order queue that executes commands immediately and keeps a log.
#[derive(Debug, Default)]
pub struct CpuQueue {
    log: Mutex<Vec<QueueOp>>,
}

impl CpuQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands executed so far, oldest first.
    pub fn ops(&self) -> Vec<QueueOp> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    fn record(&self, op: QueueOp) {
        if let Ok(mut log) = self.log.lock() {
            log.push(op);
        }
    }
}

/// Compiled kernel: the specialization it was built with.
#[derive(Debug, Clone)]
pub struct CpuKernel {
    specialization: KernelSpecialization,
}

/// Host memory standing in for a device buffer. Dispatch checks that each
/// buffer is bound with the access it was allocated for.
#[derive(Debug)]
pub struct CpuBuffer {
    access: MemAccess,
    bytes: Vec<u8>,
}

/// Builder for [`CpuReferenceAccelerator`].
#[derive(Debug, Clone)]
pub struct CpuReferenceBuilder {
    max_group_size: usize,
    supports_fp64: bool,
    device_name: String,
    failure: Option<FailurePoint>,
}

impl Default for CpuReferenceBuilder {
    fn default() -> Self {
        Self {
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            supports_fp64: true,
            device_name: "CPU reference".to_string(),
            failure: None,
        }
    }
}

impl CpuReferenceBuilder {
    /// Group size reported for every kernel. Need not be a power of two.
    pub fn max_group_size(mut self, size: usize) -> Self {
        self.max_group_size = size;
        self
    }

    pub fn supports_fp64(mut self, supported: bool) -> Self {
        self.supports_fp64 = supported;
        self
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Make every command at `point` fail with an `Accelerator` error.
    pub fn fail_at(mut self, point: FailurePoint) -> Self {
        self.failure = Some(point);
        self
    }

    pub fn build(self) -> CpuReferenceAccelerator {
        CpuReferenceAccelerator {
            max_group_size: self.max_group_size,
            supports_fp64: self.supports_fp64,
            device_name: self.device_name,
            failure: self.failure,
            live_buffers: AtomicUsize::new(0),
            live_kernels: AtomicUsize::new(0),
            dispatches: AtomicUsize::new(0),
            compiled: Mutex::new(Vec::new()),
        }
    }
}

/// Accelerator that emulates the device kernel on the calling thread.
#[derive(Debug)]
pub struct CpuReferenceAccelerator {
    max_group_size: usize,
    supports_fp64: bool,
    device_name: String,
    failure: Option<FailurePoint>,
    live_buffers: AtomicUsize,
    live_kernels: AtomicUsize,
    dispatches: AtomicUsize,
    compiled: Mutex<Vec<String>>,
}

impl Default for CpuReferenceAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuReferenceAccelerator {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CpuReferenceBuilder {
        CpuReferenceBuilder::default()
    }

    /// Buffers allocated and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    /// Kernels compiled and not yet released.
    pub fn live_kernels(&self) -> usize {
        self.live_kernels.load(Ordering::SeqCst)
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    /// Build options of every successful compilation, oldest first.
    pub fn compiled_options(&self) -> Vec<String> {
        self.compiled.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn check_failure(&self, point: FailurePoint) -> Result<()> {
        if self.failure == Some(point) {
            return Err(ReductionError::Accelerator(format!(
                "injected {point:?} failure"
            )));
        }
        Ok(())
    }
}

impl Accelerator for CpuReferenceAccelerator {
    type Kernel = CpuKernel;
    type Buffer = CpuBuffer;
    type Queue = CpuQueue;

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn compile(
        &self,
        template: &KernelTemplate,
        specialization: &KernelSpecialization,
    ) -> Result<CpuKernel> {
        if !template.declares_entry_point(REDUCE_ENTRY_POINT) {
            return Err(ReductionError::KernelCompilationFailed {
                diagnostic: format!("no kernel named '{REDUCE_ENTRY_POINT}' in program source"),
            });
        }
        if specialization.extended_precision && !self.supports_fp64 {
            return Err(ReductionError::KernelCompilationFailed {
                diagnostic: format!(
                    "{}: extension cl_khr_fp64 is not supported",
                    self.device_name
                ),
            });
        }
        if specialization.element == ElementKind::Float64 && !specialization.extended_precision {
            return Err(ReductionError::KernelCompilationFailed {
                diagnostic: "use of type 'double' requires cl_khr_fp64 extension to be enabled"
                    .to_string(),
            });
        }

        let build_options = specialization.build_options();
        if let Ok(mut compiled) = self.compiled.lock() {
            compiled.push(build_options.clone());
        }
        self.live_kernels.fetch_add(1, Ordering::SeqCst);
        debug!(options = %build_options, "compiled reference kernel");
        Ok(CpuKernel {
            specialization: specialization.clone(),
        })
    }

    fn max_group_size(&self, _kernel: &CpuKernel, _queue: &CpuQueue) -> Result<usize> {
        Ok(self.max_group_size)
    }

    fn allocate(&self, access: MemAccess, bytes: usize) -> Result<CpuBuffer> {
        if bytes == 0 {
            return Err(ReductionError::Accelerator("zero-sized buffer".to_string()));
        }
        self.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(CpuBuffer {
            access,
            bytes: vec![0; bytes],
        })
    }

    fn enqueue_upload(
        &self,
        queue: &CpuQueue,
        buffer: &mut CpuBuffer,
        data: &[u8],
        blocking: bool,
    ) -> Result<()> {
        self.check_failure(FailurePoint::Upload)?;
        if data.len() > buffer.bytes.len() {
            return Err(ReductionError::Accelerator(format!(
                "upload of {} bytes exceeds buffer of {} bytes",
                data.len(),
                buffer.bytes.len()
            )));
        }
        buffer.bytes[..data.len()].copy_from_slice(data);
        queue.record(QueueOp::Upload {
            bytes: data.len(),
            blocking,
        });
        Ok(())
    }

    fn enqueue_dispatch(
        &self,
        queue: &CpuQueue,
        kernel: &CpuKernel,
        args: ReduceArgs<'_, CpuBuffer>,
        geometry: DispatchGeometry,
    ) -> Result<()> {
        self.check_failure(FailurePoint::Dispatch)?;
        let ReduceArgs {
            input,
            output,
            scratch_bytes,
            span: span_items,
        } = args;
        if input.access != MemAccess::ReadOnly || output.access != MemAccess::WriteOnly {
            return Err(ReductionError::Accelerator(format!(
                "reduce expects a read-only input and a write-only output, got {:?} and {:?}",
                input.access, output.access
            )));
        }
        let local = geometry.local;
        if local < 2 || !local.is_power_of_two() || geometry.global % local != 0 {
            return Err(ReductionError::Accelerator(format!(
                "invalid dispatch geometry: global {} local {}",
                geometry.global, local
            )));
        }
        if local > self.max_group_size {
            return Err(ReductionError::Accelerator(format!(
                "group size {local} exceeds device limit {}",
                self.max_group_size
            )));
        }

        let kind = kernel.specialization.element;
        let vector_bytes = kind.vector_bytes();
        let span = span_items as usize;
        let groups = geometry.groups();
        if scratch_bytes < (local / 2) * vector_bytes {
            return Err(ReductionError::Accelerator(format!(
                "scratch of {scratch_bytes} bytes too small for group size {local}"
            )));
        }
        if input.bytes.len() < 2 * span * vector_bytes {
            return Err(ReductionError::Accelerator(format!(
                "input buffer of {} bytes shorter than span {span}",
                input.bytes.len()
            )));
        }
        if output.bytes.len() < groups * vector_bytes {
            return Err(ReductionError::Accelerator(format!(
                "output buffer of {} bytes cannot hold {groups} partials",
                output.bytes.len()
            )));
        }

        let op = kernel.specialization.operation;
        let run = match kind {
            ElementKind::Int16 => run_groups::<i16>,
            ElementKind::Int32 => run_groups::<i32>,
            ElementKind::Int64 => run_groups::<i64>,
            ElementKind::Float32 => run_groups::<f32>,
            ElementKind::Float64 => run_groups::<f64>,
        };
        run(op, &input.bytes, &mut output.bytes, span, local, groups)?;

        self.dispatches.fetch_add(1, Ordering::SeqCst);
        queue.record(QueueOp::Dispatch {
            global: geometry.global,
            local,
            scratch_bytes,
            span: span_items,
        });
        trace!(groups, local, span, "reference dispatch complete");
        Ok(())
    }

    fn enqueue_download(
        &self,
        queue: &CpuQueue,
        buffer: &CpuBuffer,
        out: &mut [u8],
        blocking: bool,
    ) -> Result<()> {
        self.check_failure(FailurePoint::Download)?;
        if out.len() > buffer.bytes.len() {
            return Err(ReductionError::Accelerator(format!(
                "download of {} bytes exceeds buffer of {} bytes",
                out.len(),
                buffer.bytes.len()
            )));
        }
        out.copy_from_slice(&buffer.bytes[..out.len()]);
        queue.record(QueueOp::Download {
            bytes: out.len(),
            blocking,
        });
        Ok(())
    }

    fn finish(&self, queue: &CpuQueue) -> Result<()> {
        // Commands run eagerly, so there is nothing left to wait for.
        queue.record(QueueOp::Finish);
        Ok(())
    }

    fn release_buffer(&self, buffer: CpuBuffer) {
        drop(buffer);
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }

    fn release_kernel(&self, kernel: CpuKernel) {
        drop(kernel);
        self.live_kernels.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── kernel emulation ─────────────────────────────────────────────

type Lanes<T> = [T; VECTOR_WIDTH];

fn load<T: Element>(bytes: &[u8], index: usize) -> Lanes<T> {
    let width = std::mem::size_of::<T>();
    let base = index * width * VECTOR_WIDTH;
    std::array::from_fn(|lane| {
        let start = base + lane * width;
        bytemuck::pod_read_unaligned(&bytes[start..start + width])
    })
}

fn store<T: Element>(bytes: &mut [u8], index: usize, value: &Lanes<T>) {
    let width = std::mem::size_of::<T>() * VECTOR_WIDTH;
    bytes[index * width..(index + 1) * width]
        .copy_from_slice(bytemuck::cast_slice::<T, u8>(value.as_slice()));
}

fn combine<T: Element>(op: ReductionOperation, a: &Lanes<T>, b: &Lanes<T>) -> Lanes<T> {
    std::array::from_fn(|lane| T::device_combine(op, a[lane], b[lane]))
}

/// One pass of `reduce.cl` over every group. Scratch slots are `None` until
/// written, mirroring uninitialized local memory.
fn run_groups<T: Element>(
    op: ReductionOperation,
    input: &[u8],
    output: &mut [u8],
    span: usize,
    local: usize,
    groups: usize,
) -> Result<()> {
    let half = local / 2;
    let mut scratch: Vec<Option<Lanes<T>>> = vec![None; half];

    for group in 0..groups {
        let base = group * local;
        let mut live = span.saturating_sub(base).min(local);
        scratch.fill(None);

        let value = |lid: usize| -> Lanes<T> {
            let gid = base + lid;
            combine(op, &load::<T>(input, gid), &load::<T>(input, gid + span))
        };

        // upper half parks, then barrier, then lower half folds
        for lid in half..live.max(half) {
            scratch[lid - half] = Some(value(lid));
        }
        for lid in 0..half.min(live) {
            let own = value(lid);
            scratch[lid] = Some(match scratch[lid] {
                Some(parked) if lid + half < live => combine(op, &own, &parked),
                _ => own,
            });
        }
        live = live.min(half);

        let mut stride = half / 2;
        while stride > 0 {
            for lid in 0..stride {
                if lid + stride < live {
                    if let (Some(a), Some(b)) = (scratch[lid], scratch[lid + stride]) {
                        scratch[lid] = Some(combine(op, &a, &b));
                    }
                }
            }
            live = live.min(stride);
            stride /= 2;
        }

        let partial = scratch[0].ok_or_else(|| {
            ReductionError::Accelerator(format!("group {group} has no live items"))
        })?;
        store(output, group, &partial);
    }
    Ok(())
}
