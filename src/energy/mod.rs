//! Data-term energy gradients
//!
//! The solver hands every time subdivision to an [`EnergyGradientStrategy`]
//! as a [`TimeFrame`] and smooths whatever vector field comes back.

mod ssd;

pub use ssd::{weighted_ssd, SsdGradient};

use crate::error::Result;
use crate::field::{ScalarField, VectorField};

/// One channel at one time subdivision
pub struct ChannelFrame<'a> {
    pub weight: f64,
    /// Template pushed forward to this time, J0(t)
    pub deformed_template: &'a ScalarField,
    /// Target pulled back to this time, J1(t)
    pub deformed_target: &'a ScalarField,
    /// Spatial gradient of `deformed_template`
    pub template_gradient: &'a VectorField,
}

/// Everything the data term may use at one time subdivision
pub struct TimeFrame<'a> {
    pub time: usize,
    pub channels: &'a [ChannelFrame<'a>],
    /// Jacobian determinant of the backward mapping at this time
    pub backward_jacobian: &'a ScalarField,
    /// Active voxels (1) after margin and mask
    pub region: &'a [u8],
}

/// Unsmoothed gradient of the image-matching energy with respect to the velocity
pub trait EnergyGradientStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Data-term gradient at one time subdivision, zero outside the region
    fn gradient(&self, frame: &TimeFrame<'_>) -> Result<VectorField>;
}
