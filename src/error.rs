//! Error types for LDDMM registration.
//!
//! Configuration and shape problems are rejected before a run allocates
//! anything; numeric divergence aborts a run. Folding of the final mapping
//! is advisory and lives in [`crate::transport::FoldingReport`] instead.

use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum LddmmError {
    /// Invalid run configuration (kernel sigma, weights, iteration counts, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Two fields that must share a lattice do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// Channel count disagreement between images and configuration.
    #[error("Channel mismatch: expected {expected} channel(s), got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// NaN or infinity detected in a gradient or velocity field.
    #[error("Numeric divergence in {what} at iteration {iteration}, time {time}, voxel {voxel:?}")]
    NumericDivergence {
        iteration: usize,
        time: usize,
        voxel: [usize; 3],
        what: &'static str,
    },

    /// Persistence boundary failure (NIfTI, JSON, filesystem).
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, LddmmError>;

impl LddmmError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an I/O error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Whether the error was raised before any iteration could run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::ShapeMismatch { .. } | Self::ChannelMismatch { .. }
        )
    }
}

impl From<std::io::Error> for LddmmError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for LddmmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(format!("JSON: {}", e))
    }
}
