//! Error taxonomy for reduction engine construction and dispatch.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ElementKind, NumericType};

/// Errors produced while building or running a reduction engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReductionError {
    #[error("unsupported element kind: {0} (supported: short, int, long, float, double)")]
    UnsupportedElementKind(NumericType),

    #[error("reduction kernel compilation failed: {diagnostic}")]
    KernelCompilationFailed { diagnostic: String },

    #[error("input length {length} is not a positive multiple of {multiple}")]
    InvalidInputSize { length: usize, multiple: usize },

    #[error("element kind mismatch: engine reduces {expected}, buffer holds {actual}")]
    ElementKindMismatch {
        expected: ElementKind,
        actual: ElementKind,
    },

    #[error("unknown reduction operation: {0}")]
    UnknownOperation(String),

    #[error("reduction engine has been released")]
    EngineReleased,

    #[error("execution group size {0} is not a power of two >= 2")]
    InvalidGroupSize(usize),

    #[error("output buffer has no slot for the reduced value")]
    EmptyOutput,

    #[error("malformed partial results: {bytes} bytes of {width}-byte scalars")]
    MalformedPartials { bytes: usize, width: usize },

    #[error("kernel source {path} unavailable: {reason}")]
    KernelSourceUnavailable { path: PathBuf, reason: String },

    #[error("invalid reduction config: {0}")]
    InvalidConfig(String),

    #[error("accelerator error: {0}")]
    Accelerator(String),
}

impl ReductionError {
    /// Whether the caller can retry the failing operation with corrected
    /// arguments against the same engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidInputSize { .. }
                | Self::ElementKindMismatch { .. }
                | Self::UnknownOperation(_)
                | Self::EmptyOutput
                | Self::KernelSourceUnavailable { .. }
                | Self::InvalidConfig(_)
        )
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ReductionError>;
