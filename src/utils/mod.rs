//! Utility operators shared by the registration modules

pub mod gradient;
pub mod mask;

pub use gradient::{central_gradient, central_gradient_inplace, diffusion_step_inplace};
pub use mask::{region_mask, threshold_mask};
