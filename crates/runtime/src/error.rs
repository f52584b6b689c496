//! Runtime error types.

use std::time::Duration;

use storage::ValueType;
use thiserror::Error;

use crate::args::ArgumentError;

/// Needle execution errors.
///
/// Validation failures (`Argument`, `Storage`) happen before any guest code
/// runs. The rest describe how the generated source or its result failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("code generation failed: {0}")]
    Generation(String),

    #[error("generated source failed to compile: {0}")]
    Compile(String),

    #[error("needle failed: {0}")]
    Runtime(String),

    #[error("needle produced no value (expected {expected})")]
    NoValue { expected: ValueType },

    #[error("needle returned {found}, expected {expected}")]
    TypeMismatch { expected: ValueType, found: String },

    #[error("needle exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("sandbox setup failed: {0}")]
    Sandbox(String),

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
