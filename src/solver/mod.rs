//! Gradient-descent LDDMM driver
//!
//! [`LddmmSolver`] owns the velocity field for the whole run. Every iteration
//! integrates it into mappings, asks the energy strategy for the data term at
//! every time subdivision, smooths it and takes a bounded descent step.

mod channels;
mod driver;
mod result;

pub use channels::{align_grey_levels, ChannelImages};
pub use driver::{KernelAmplitudes, LddmmSolver, GRADIENT_FLOOR};
pub use result::{FlowLengthSummary, IterationRecord, KernelContribution, RegistrationResult, Termination};
