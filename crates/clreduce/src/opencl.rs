//! OpenCL accelerator built on `opencl3`.
//!
//! Compiles the reduction template for one device and maps each
//! [`Accelerator`] command onto the matching `clEnqueue*` call.

use clreduce_common::{ReductionError, Result};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_GPU};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, ClMem, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY};
use opencl3::program::Program;
use opencl3::types::{cl_uint, CL_BLOCKING, CL_NON_BLOCKING};
use tracing::{debug, info, warn};

use crate::accelerator::{Accelerator, DispatchGeometry, MemAccess, ReduceArgs};
use crate::kernels::{KernelSpecialization, KernelTemplate, REDUCE_ENTRY_POINT};

fn cl_err(what: &str, e: impl std::fmt::Display) -> ReductionError {
    ReductionError::Accelerator(format!("{what}: {e}"))
}

/// Built program plus its `reduce` kernel object.
pub struct OpenClKernel {
    kernel: Kernel,
    _program: Program,
    build_options: String,
}

impl std::fmt::Debug for OpenClKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClKernel")
            .field("build_options", &self.build_options)
            .finish()
    }
}

// SAFETY: the engine serializes argument binding behind a mutex; the OpenCL
// runtime reference-counts kernel and program objects across threads.
unsafe impl Send for OpenClKernel {}

/// One OpenCL device and a context on it.
pub struct OpenClAccelerator {
    device: Device,
    context: Context,
    device_name: String,
}

// SAFETY: contexts and device ids are thread-safe OpenCL objects; queues
// created from this context serialize their own commands.
unsafe impl Send for OpenClAccelerator {}
unsafe impl Sync for OpenClAccelerator {}

impl std::fmt::Debug for OpenClAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClAccelerator")
            .field("device_name", &self.device_name)
            .finish()
    }
}

impl OpenClAccelerator {
    /// Open the first GPU reported by any platform.
    pub fn first_gpu() -> Result<Self> {
        let ids = get_all_devices(CL_DEVICE_TYPE_GPU)
            .map_err(|e| cl_err("Failed to enumerate OpenCL GPUs", e))?;
        let Some(&id) = ids.first() else {
            return Err(ReductionError::Accelerator(
                "No OpenCL GPU devices found".into(),
            ));
        };
        Self::from_device(Device::new(id))
    }

    pub fn from_device(device: Device) -> Result<Self> {
        let device_name = device.name().unwrap_or_else(|e| {
            warn!("Could not query OpenCL device name: {}", e);
            String::from("unknown OpenCL device")
        });
        let context = Context::from_device(&device)
            .map_err(|e| cl_err("Failed to create OpenCL context", e))?;
        info!(device = %device_name, "OpenCL accelerator ready");
        Ok(Self {
            device,
            context,
            device_name,
        })
    }

    /// In-order queue on this accelerator's device.
    pub fn create_queue(&self) -> Result<CommandQueue> {
        CommandQueue::create_default_with_properties(&self.context, 0, 0)
            .map_err(|e| cl_err("Failed to create command queue", e))
    }
}

impl Accelerator for OpenClAccelerator {
    type Kernel = OpenClKernel;
    type Buffer = Buffer<u8>;
    type Queue = CommandQueue;

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn compile(
        &self,
        template: &KernelTemplate,
        specialization: &KernelSpecialization,
    ) -> Result<OpenClKernel> {
        let build_options = specialization.build_options();
        debug!(options = %build_options, device = %self.device_name, "building reduction program");
        let program = Program::create_and_build_from_source(
            &self.context,
            template.source(),
            &build_options,
        )
        .map_err(|log| ReductionError::KernelCompilationFailed { diagnostic: log })?;
        let kernel = Kernel::create(&program, REDUCE_ENTRY_POINT).map_err(|e| {
            ReductionError::KernelCompilationFailed {
                diagnostic: format!("kernel '{REDUCE_ENTRY_POINT}': {e}"),
            }
        })?;
        Ok(OpenClKernel {
            kernel,
            _program: program,
            build_options,
        })
    }

    fn max_group_size(&self, kernel: &OpenClKernel, _queue: &CommandQueue) -> Result<usize> {
        kernel
            .kernel
            .get_work_group_size(self.device.id())
            .map_err(|e| cl_err("Failed to query kernel work-group size", e))
    }

    fn allocate(&self, access: MemAccess, bytes: usize) -> Result<Buffer<u8>> {
        let flags = match access {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
        };
        // SAFETY: no host pointer is passed, so the runtime owns the storage.
        unsafe {
            Buffer::<u8>::create(&self.context, flags, bytes, std::ptr::null_mut())
                .map_err(|e| cl_err(&format!("Buffer create ({bytes} bytes)"), e))
        }
    }

    fn enqueue_upload(
        &self,
        queue: &CommandQueue,
        buffer: &mut Buffer<u8>,
        data: &[u8],
        blocking: bool,
    ) -> Result<()> {
        let mode = if blocking {
            CL_BLOCKING
        } else {
            CL_NON_BLOCKING
        };
        // SAFETY: `data` outlives the transfer per the trait contract; a
        // non-blocking write is completed by a later blocking command or by
        // `finish`.
        unsafe {
            queue
                .enqueue_write_buffer(buffer, mode, 0, data, &[])
                .map_err(|e| cl_err("Write input", e))?;
        }
        Ok(())
    }

    fn enqueue_dispatch(
        &self,
        queue: &CommandQueue,
        kernel: &OpenClKernel,
        args: ReduceArgs<'_, Buffer<u8>>,
        geometry: DispatchGeometry,
    ) -> Result<()> {
        let span: cl_uint = args.span;
        // SAFETY: argument types and order match the `reduce` signature.
        unsafe {
            ExecuteKernel::new(&kernel.kernel)
                .set_arg(&args.input.get())
                .set_arg(&args.output.get())
                .set_arg_local_buffer(args.scratch_bytes)
                .set_arg(&span)
                .set_global_work_size(geometry.global)
                .set_local_work_size(geometry.local)
                .enqueue_nd_range(queue)
                .map_err(|e| cl_err("Enqueue reduce", e))?;
        }
        Ok(())
    }

    fn enqueue_download(
        &self,
        queue: &CommandQueue,
        buffer: &Buffer<u8>,
        out: &mut [u8],
        blocking: bool,
    ) -> Result<()> {
        let mode = if blocking {
            CL_BLOCKING
        } else {
            CL_NON_BLOCKING
        };
        // SAFETY: `out` is exclusively borrowed for the duration of the call
        // and the engine always downloads blocking.
        unsafe {
            queue
                .enqueue_read_buffer(buffer, mode, 0, out, &[])
                .map_err(|e| cl_err("Read partials", e))?;
        }
        Ok(())
    }

    fn finish(&self, queue: &CommandQueue) -> Result<()> {
        queue.finish().map_err(|e| cl_err("Finish queue", e))
    }

    fn release_buffer(&self, buffer: Buffer<u8>) {
        drop(buffer);
    }

    fn release_kernel(&self, kernel: OpenClKernel) {
        drop(kernel);
    }
}
