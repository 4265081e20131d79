//! Regularisation of the energy gradient
//!
//! The velocity update is smoothed by a reproducing kernel before it is
//! applied, which keeps the integrated mapping diffeomorphic. Two strategies
//! are provided:
//! - `FftConvolver`: weighted sum of Gaussian kernels applied in the
//!   frequency domain (the default)
//! - `DiffusionSmoother`: explicit Laplacian relaxation (heat equation),
//!   an alternative regulariser that needs no FFT

pub mod convolver;
pub mod diffusion;

pub use convolver::{FftConvolver, WeightedKernel, MAX_KERNELS};
pub use diffusion::DiffusionSmoother;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::VectorField;

/// How the FFT lattice treats the image boundary
///
/// The kernel spectra and the transformed fields are always built on the
/// same lattice, so the two cannot disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// FFT on the image lattice itself: opposite faces wrap around
    Periodic,
    /// Each axis is extended with zeros by the kernel support radius
    ZeroPadded,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::Periodic
    }
}

/// A smoothing operator for vector fields
pub trait SmoothingStrategy: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Number of separately measurable kernel contributions
    fn kernel_count(&self) -> usize {
        1
    }

    /// Smoothed copy of `field`; the input is left untouched
    fn smooth(&mut self, field: &VectorField) -> Result<VectorField>;

    /// Contribution of each kernel; the contributions sum to [`Self::smooth`]
    fn smooth_per_kernel(&mut self, field: &VectorField) -> Result<Vec<VectorField>> {
        Ok(vec![self.smooth(field)?])
    }
}
