use serde::{Deserialize, Serialize};

use crate::field::{ScalarField, VectorField, VelocityField};
use crate::transport::{
    compute_mappings, flow_length, flow_length_evolution, jacobian_determinant, JacobianField, TimeMapping,
};

/// How a run ended; both are normal outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Gradient fell below epsilon times the reference gradient
    Converged,
    /// The iteration cap was reached first
    IterationLimitReached,
}

/// Diagnostics of one outer iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Global iteration index, counting resumed iterations
    pub iteration: usize,
    pub max_gradient: f64,
    pub reference_gradient: f64,
    /// Weighted SSD between the deformed template and the target at time 1
    pub ssd: f64,
    /// Step applied to the gradient (0 when the iteration converged)
    pub step: f64,
}

/// Mean flow length of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowLengthSummary {
    /// Mean trajectory length at time 1
    pub global: f64,
    /// Mean trajectory length after each time subdivision
    pub evolution: Vec<f64>,
}

/// What a single kernel's velocity component does on its own
#[derive(Debug, Clone)]
pub struct KernelContribution {
    pub forward_deformation: VectorField,
    pub jacobian: JacobianField,
    pub flow_length: ScalarField,
}

/// Outcome of a registration run
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub velocity: VelocityField,
    /// Per-kernel velocity components when kernels are split
    pub split_velocities: Option<Vec<VelocityField>>,
    /// F[t]: time-t coordinates to template coordinates
    pub forward: TimeMapping,
    /// B[t]: time-t coordinates to target coordinates
    pub backward: TimeMapping,
    pub termination: Termination,
    /// Iterations completed, including resumed ones
    pub iterations: usize,
    pub reference_gradient: Option<f64>,
    pub history: Vec<IterationRecord>,
    pub(crate) margin: usize,
    pub(crate) initial_momentum: Option<ScalarField>,
}

impl RegistrationResult {
    /// Displacement taking target voxels to where they sample the template
    pub fn forward_deformation(&self) -> VectorField {
        self.forward.final_frame().displacement()
    }

    /// Displacement taking template voxels to their position in the target
    pub fn inverse_deformation(&self) -> VectorField {
        self.backward.first_frame().displacement()
    }

    /// Jacobian determinant of the final forward mapping
    pub fn jacobian(&self) -> JacobianField {
        jacobian_determinant(self.forward.final_frame(), self.margin)
    }

    pub fn flow_length(&self) -> ScalarField {
        flow_length(&self.velocity)
    }

    /// Mean flow length over the region away from the margin
    pub fn flow_length_summary(&self) -> FlowLengthSummary {
        let evolution = flow_length_evolution(&self.velocity, self.margin);
        FlowLengthSummary {
            global: evolution.last().copied().unwrap_or(0.0),
            evolution,
        }
    }

    /// Integrate each split kernel component on its own
    ///
    /// Empty unless kernels were split.
    pub fn kernel_contributions(&self) -> Vec<KernelContribution> {
        let parts = match &self.split_velocities {
            Some(parts) => parts,
            None => return Vec::new(),
        };
        parts
            .iter()
            .map(|part| {
                let (forward, _) = compute_mappings(part);
                KernelContribution {
                    forward_deformation: forward.final_frame().displacement(),
                    jacobian: jacobian_determinant(forward.final_frame(), self.margin),
                    flow_length: flow_length(part),
                }
            })
            .collect()
    }

    /// Scalar momentum at time 0, when requested in the output configuration
    pub fn initial_momentum(&self) -> Option<&ScalarField> {
        self.initial_momentum.as_ref()
    }

    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}
