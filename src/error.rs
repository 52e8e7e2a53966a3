//! Error types for parkmeans operations.
//!
//! Configuration problems are surfaced as typed errors before any worker is
//! spawned. I/O and collective failures that occur after workers have
//! started are fatal by contract and terminate the process instead of
//! passing through this type.

use std::io;
use thiserror::Error;

/// Result type alias using [`ParKMeansError`].
pub type Result<T> = std::result::Result<T, ParKMeansError>;

/// Errors that can occur while configuring or launching a clustering run.
#[derive(Error, Debug)]
pub enum ParKMeansError {
    /// A configuration field has an invalid value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The initialization method tag was not recognized.
    #[error("unknown initialization method '{0}'")]
    UnknownInit(String),

    /// The requested method is declared but not implemented.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Input data length does not match the stated matrix shape.
    #[error("dimension mismatch: expected {expected} elements, got {actual}")]
    DimensionMismatch {
        /// Expected element count (`n_rows * dim`).
        expected: usize,
        /// Actual element count provided.
        actual: usize,
    },

    /// More clusters requested than there are data points.
    #[error("insufficient samples: requested {k} clusters from {n} samples")]
    InsufficientSamples {
        /// Number of clusters requested.
        k: usize,
        /// Number of samples available.
        n: usize,
    },

    /// The input file is smaller than the stated matrix shape requires.
    #[error("input file too small: need {required} bytes, found {actual}")]
    ShortInput {
        /// Bytes required by `n_rows * dim * 8`.
        required: u64,
        /// Bytes actually present.
        actual: u64,
    },

    /// I/O error during pre-flight checks.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A reduction or broadcast in the messaging substrate failed.
    #[error("collective operation failed: {0}")]
    Collective(String),
}

impl ParKMeansError {
    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Creates a new `NotSupported` error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }
}
