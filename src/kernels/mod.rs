//! Spatial smoothing kernels
//!
//! Kernels are generated directly on the FFT lattice, centred at voxel
//! (0, 0, 0) with periodic offsets, so that their spectrum can be precomputed
//! once and reused for every convolution on that lattice.

pub mod gaussian;

pub use gaussian::GaussianKernel;

use crate::field::Grid;

/// A reproducing kernel that can be sampled on a lattice
pub trait KernelStrategy: Send + Sync + std::fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Kernel values on `grid`, centred at the origin, summing to one
    fn spatial_kernel(&self, grid: &Grid) -> Vec<f64>;

    /// Per-axis radius in voxels of `grid` beyond which the kernel is negligible
    fn support_radius(&self, grid: &Grid) -> [usize; 3];
}

/// Signed periodic offset of index `i` from the origin on an axis of length `n`
#[inline]
pub fn periodic_offset(i: usize, n: usize) -> f64 {
    if i <= n / 2 {
        i as f64
    } else {
        i as f64 - n as f64
    }
}
