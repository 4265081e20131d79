//! Semi-Lagrangian transport of the velocity field
//!
//! Integrates a [`VelocityField`](crate::field::VelocityField) into forward and
//! backward mappings, projects images through them and measures the local
//! volume change of a mapping.

mod flow;
mod jacobian;
mod mapping;

pub use flow::{flow_length, flow_length_evolution};
pub(crate) use jacobian::determinant;
pub use jacobian::{jacobian_determinant, FoldingReport, JacobianField, FOLDING_THRESHOLD};
pub use mapping::{apply_mapping, compute_mappings, TimeMapping};
