//! The reduction engine: one compiled kernel, many reductions.

use std::sync::{Arc, Mutex, MutexGuard};

use clreduce_common::{
    ElementKind, NumericType, ReductionConfig, ReductionError, ReductionOperation, Result,
};
use tracing::{debug, info, warn};

use crate::accelerator::{Accelerator, DispatchGeometry, MemAccess, ReduceArgs};
use crate::element::Element;
use crate::finalize::finalize;
use crate::kernels::{KernelSpecialization, KernelTemplate};
use crate::partition::{normalize_group_size, partition, WorkPartition};

/// Reduces numeric buffers with one operation over one element kind.
///
/// Each [`reduce`](Self::reduce) call partitions the input, lets the
/// accelerator tree-reduce every execution group to a vector partial, then
/// folds the partials on the host. Calls on one engine are serialized.
pub struct ReductionEngine<A: Accelerator> {
    accelerator: Arc<A>,
    kernel: Mutex<Option<A::Kernel>>,
    operation: ReductionOperation,
    kind: ElementKind,
    group_size_cap: usize,
}

impl<A: Accelerator> std::fmt::Debug for ReductionEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReductionEngine")
            .field("operation", &self.operation)
            .field("kind", &self.kind)
            .field("released", &self.is_released())
            .finish()
    }
}

impl<A: Accelerator> ReductionEngine<A> {
    /// Compile a kernel for `operation` over `numeric_type` with the default
    /// configuration.
    ///
    /// # Errors
    ///
    /// `UnsupportedElementKind` for 8-bit integers, `KernelCompilationFailed`
    /// when the accelerator rejects the specialized template.
    pub fn create(
        accelerator: Arc<A>,
        operation: ReductionOperation,
        numeric_type: NumericType,
    ) -> Result<Self> {
        Self::with_config(
            accelerator,
            operation,
            numeric_type,
            &ReductionConfig::default(),
        )
    }

    /// Like [`create`](Self::create), honouring `config`'s group size cap,
    /// extra build options and template override.
    ///
    /// The config is validated first; a rejected config fails with
    /// `InvalidConfig` before anything is compiled.
    pub fn with_config(
        accelerator: Arc<A>,
        operation: ReductionOperation,
        numeric_type: NumericType,
        config: &ReductionConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ReductionError::InvalidConfig(e.to_string()))?;
        let kind = ElementKind::try_from(numeric_type)?;

        let loaded;
        let template = match &config.kernel_source {
            Some(path) => {
                loaded = KernelTemplate::from_file(path)?;
                &loaded
            }
            None => KernelTemplate::embedded(),
        };
        let specialization =
            KernelSpecialization::new(operation, kind).with_extra_options(&config.build_options);
        let kernel = accelerator.compile(template, &specialization)?;

        info!(
            %operation,
            %kind,
            device = %accelerator.device_name(),
            "reduction engine ready"
        );
        Ok(Self {
            accelerator,
            kernel: Mutex::new(Some(kernel)),
            operation,
            kind,
            group_size_cap: config.max_group_size as usize,
        })
    }

    /// Engine whose element kind is that of `T`.
    pub fn for_element<T: Element>(
        accelerator: Arc<A>,
        operation: ReductionOperation,
    ) -> Result<Self> {
        Self::create(accelerator, operation, T::KIND.into())
    }

    pub fn operation(&self) -> ReductionOperation {
        self.operation
    }

    pub fn element_kind(&self) -> ElementKind {
        self.kind
    }

    /// Reduce `input` and store the result in `output[0]`.
    ///
    /// `input.len()` must be a positive multiple of
    /// [`INPUT_MULTIPLE`](crate::INPUT_MULTIPLE). `output` is left untouched
    /// on error.
    ///
    /// # Errors
    ///
    /// `EngineReleased`, `ElementKindMismatch` when `T` is not the engine's
    /// kind (checked before any accelerator call), `EmptyOutput`,
    /// `InvalidInputSize`, `InvalidGroupSize`, and accelerator failures.
    pub fn reduce<'o, T: Element>(
        &self,
        queue: &A::Queue,
        input: &[T],
        output: &'o mut [T],
    ) -> Result<&'o mut [T]> {
        let guard = self.lock_kernel();
        let kernel = guard.as_ref().ok_or(ReductionError::EngineReleased)?;
        if T::KIND != self.kind {
            return Err(ReductionError::ElementKindMismatch {
                expected: self.kind,
                actual: T::KIND,
            });
        }
        let Some(slot) = output.first_mut() else {
            return Err(ReductionError::EmptyOutput);
        };

        let negotiated = self.accelerator.max_group_size(kernel, queue)?;
        let group_size = normalize_group_size(negotiated, self.group_size_cap)?;
        let work = partition(input.len(), group_size, self.kind)?;
        debug!(
            op = %self.operation,
            kind = %self.kind,
            len = input.len(),
            group_size = work.group_size,
            groups = work.groups,
            execution_items = work.execution_items,
            "reduce"
        );

        let partials = self.run_on_device(queue, kernel, bytemuck::cast_slice(input), &work)?;
        drop(guard);

        let value = finalize(self.operation, &partials, self.kind)?;
        *slot = T::from_scalar(value).ok_or(ReductionError::ElementKindMismatch {
            expected: T::KIND,
            actual: value.kind(),
        })?;
        Ok(output)
    }

    /// Reduce `input` to a single value.
    pub fn reduce_scalar<T: Element>(&self, queue: &A::Queue, input: &[T]) -> Result<T> {
        let mut out = [<T as bytemuck::Zeroable>::zeroed()];
        self.reduce(queue, input, &mut out)?;
        Ok(out[0])
    }

    /// Release the compiled kernel. Later reductions fail with
    /// `EngineReleased`; releasing again does nothing.
    pub fn release(&self) {
        if let Some(kernel) = self.lock_kernel().take() {
            self.accelerator.release_kernel(kernel);
            debug!(op = %self.operation, kind = %self.kind, "reduction engine released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.lock_kernel().is_none()
    }

    fn lock_kernel(&self) -> MutexGuard<'_, Option<A::Kernel>> {
        // A panic while holding the lock leaves the kernel itself intact.
        self.kernel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upload, dispatch and download. Both buffers are released whatever the
    /// outcome, and never while the upload may still be reading `input`.
    fn run_on_device(
        &self,
        queue: &A::Queue,
        kernel: &A::Kernel,
        input: &[u8],
        work: &WorkPartition,
    ) -> Result<Vec<u8>> {
        let accel = &*self.accelerator;
        let span = u32::try_from(work.span()).map_err(|_| {
            ReductionError::Accelerator(format!("span {} exceeds u32", work.span()))
        })?;
        let geometry = DispatchGeometry {
            global: work.execution_items,
            local: work.group_size,
        };

        let mut input_buf = accel.allocate(MemAccess::ReadOnly, input.len())?;
        let mut output_buf = match accel.allocate(MemAccess::WriteOnly, work.output_bytes) {
            Ok(buf) => buf,
            Err(e) => {
                accel.release_buffer(input_buf);
                return Err(e);
            }
        };

        let mut partials = vec![0u8; work.output_bytes];
        let result = accel
            .enqueue_upload(queue, &mut input_buf, input, false)
            .and_then(|()| {
                let args = ReduceArgs {
                    input: &input_buf,
                    output: &mut output_buf,
                    scratch_bytes: work.scratch_bytes,
                    span,
                };
                let executed = accel
                    .enqueue_dispatch(queue, kernel, args, geometry)
                    .and_then(|()| accel.enqueue_download(queue, &output_buf, &mut partials, true));
                if executed.is_err() {
                    // The non-blocking upload may still be reading `input`.
                    if let Err(e) = accel.finish(queue) {
                        warn!(error = %e, "failed to drain queue after a failed reduction");
                    }
                }
                executed
            });

        accel.release_buffer(input_buf);
        accel.release_buffer(output_buf);
        result.map(|()| partials)
    }
}

impl<A: Accelerator> Drop for ReductionEngine<A> {
    fn drop(&mut self) {
        self.release();
    }
}
