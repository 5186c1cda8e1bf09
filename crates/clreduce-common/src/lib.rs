//! Common types, errors and configuration for the clreduce reduction engine.
//!
//! This crate holds everything the engine and its accelerator backends agree
//! on: the closed set of element kinds and reduction operations, the error
//! taxonomy, and the TOML/environment configuration layer.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, ReductionConfig};
pub use error::{ReductionError, Result};
pub use types::{
    ElementKind, FoldSeed, NumericType, OperationDescriptor, ReductionOperation, ScalarValue,
    VECTOR_WIDTH,
};
