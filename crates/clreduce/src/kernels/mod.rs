//! Embedded OpenCL C reduction template and its specialization parameters.
//!
//! The template is compiled once per engine with a fixed operation, vector
//! type and (for `double`) the fp64 extension. See `reduce.cl` for the device
//! algorithm.

use std::borrow::Cow;
use std::path::Path;
use std::sync::OnceLock;

use clreduce_common::{ElementKind, ReductionError, ReductionOperation, Result};
use tracing::debug;

/// Static kernel source, embedded at compile time.
pub const REDUCE_SRC: &str = include_str!("reduce.cl");

/// Name of the kernel function in the template.
pub const REDUCE_ENTRY_POINT: &str = "reduce";

/// Define that enables double-precision arithmetic in the template.
pub const EXTENDED_PRECISION_DEFINE: &str = "DOUBLE_FP";

/// Reduction kernel source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelTemplate {
    source: Cow<'static, str>,
}

static EMBEDDED: OnceLock<KernelTemplate> = OnceLock::new();

impl KernelTemplate {
    /// The embedded template, loaded on first use and shared for the rest of
    /// the process.
    pub fn embedded() -> &'static KernelTemplate {
        EMBEDDED.get_or_init(|| {
            debug!(
                bytes = REDUCE_SRC.len(),
                "loaded embedded reduction kernel template"
            );
            KernelTemplate {
                source: Cow::Borrowed(REDUCE_SRC),
            }
        })
    }

    /// Wrap caller-provided source text.
    pub fn from_source(source: impl Into<String>) -> Self {
        KernelTemplate {
            source: Cow::Owned(source.into()),
        }
    }

    /// Read a replacement template from disk. Not cached.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ReductionError::KernelSourceUnavailable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        debug!(path = %path.display(), bytes = source.len(), "loaded reduction kernel template");
        Ok(Self::from_source(source))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the source declares `kernel void <name>(`.
    pub fn declares_entry_point(&self, name: &str) -> bool {
        self.source.match_indices("kernel").any(|(idx, _)| {
            let rest = self.source[idx + "kernel".len()..].trim_start();
            let Some(rest) = rest.strip_prefix("void") else {
                return false;
            };
            let rest = rest.trim_start();
            rest.strip_prefix(name)
                .is_some_and(|tail| tail.trim_start().starts_with('('))
        })
    }
}

/// Compile-time parameters for one `(operation, element kind)` kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSpecialization {
    pub operation: ReductionOperation,
    pub element: ElementKind,
    /// Set only for `double`; some devices need the fp64 extension enabled
    /// explicitly.
    pub extended_precision: bool,
    /// Additional compiler flags appended after the defines.
    pub extra_options: String,
}

impl KernelSpecialization {
    pub fn new(operation: ReductionOperation, element: ElementKind) -> Self {
        Self {
            operation,
            element,
            extended_precision: element.needs_extended_precision(),
            extra_options: String::new(),
        }
    }

    #[must_use]
    pub fn with_extra_options(mut self, options: impl Into<String>) -> Self {
        self.extra_options = options.into();
        self
    }

    /// Vector type substituted for `TYPE`, e.g. `float4`.
    pub fn vector_type(&self) -> String {
        self.element.vector_type()
    }

    /// Compiler options that specialize the template.
    pub fn build_options(&self) -> String {
        let mut opts = format!(
            "-D {} -D TYPE={}",
            self.operation.kernel_tag(),
            self.vector_type()
        );
        if self.extended_precision {
            opts.push_str(" -D ");
            opts.push_str(EXTENDED_PRECISION_DEFINE);
        }
        let extra = self.extra_options.trim();
        if !extra.is_empty() {
            opts.push(' ');
            opts.push_str(extra);
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_template_declares_reduce() {
        let template = KernelTemplate::embedded();
        assert!(template.declares_entry_point(REDUCE_ENTRY_POINT));
        assert!(!template.declares_entry_point("reduce_rows"));
    }

    #[test]
    fn embedded_template_is_cached() {
        let a = KernelTemplate::embedded() as *const KernelTemplate;
        let b = KernelTemplate::embedded() as *const KernelTemplate;
        assert_eq!(a, b);
    }

    #[test]
    fn template_mentions_every_operation_tag() {
        let src = KernelTemplate::embedded().source();
        for &op in ReductionOperation::ALL {
            let tag = op.kernel_tag();
            assert!(src.contains(tag), "missing {tag}");
        }
        assert!(src.contains(EXTENDED_PRECISION_DEFINE));
        assert!(src.contains("cl_khr_fp64"));
    }

    #[test]
    fn template_synchronizes_between_tree_steps() {
        let src = KernelTemplate::embedded().source();
        assert!(src.matches("barrier(CLK_LOCAL_MEM_FENCE)").count() >= 3);
    }

    #[test]
    fn entry_point_detection_tolerates_spacing() {
        let t = KernelTemplate::from_source("__kernel  void\n  reduce (global int4* x) {}");
        assert!(t.declares_entry_point("reduce"));
        let t = KernelTemplate::from_source("void reduce(int x) {}");
        assert!(!t.declares_entry_point("reduce"));
    }

    #[test]
    fn build_options_for_int_sum() {
        let params = KernelSpecialization::new(ReductionOperation::Sum, ElementKind::Int32);
        assert!(!params.extended_precision);
        assert_eq!(params.build_options(), "-D OP_ADD -D TYPE=int4");
    }

    #[test]
    fn build_options_for_double_max() {
        let params = KernelSpecialization::new(ReductionOperation::Max, ElementKind::Float64);
        assert!(params.extended_precision);
        assert_eq!(
            params.build_options(),
            "-D OP_MAX -D TYPE=double4 -D DOUBLE_FP"
        );
    }

    #[test]
    fn extended_precision_only_for_double() {
        for &kind in ElementKind::ALL {
            let opts = KernelSpecialization::new(ReductionOperation::Min, kind).build_options();
            assert_eq!(
                opts.contains("DOUBLE_FP"),
                kind == ElementKind::Float64,
                "{opts}"
            );
        }
    }

    #[test]
    fn extra_options_are_appended() {
        let params = KernelSpecialization::new(ReductionOperation::Product, ElementKind::Int16)
            .with_extra_options("  -cl-mad-enable ");
        assert_eq!(
            params.build_options(),
            "-D OP_MUL -D TYPE=short4 -cl-mad-enable"
        );
    }

    #[test]
    fn missing_template_file() {
        let err = KernelTemplate::from_file(Path::new("/nonexistent/reduce.cl")).unwrap_err();
        assert!(matches!(err, ReductionError::KernelSourceUnavailable { .. }));
    }
}
