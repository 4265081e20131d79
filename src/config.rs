//! Run configuration
//!
//! Everything a registration run needs besides the images themselves. The
//! configuration is validated once, when the solver is built, and is
//! immutable for the run. Kernel widths are in mm (converted through the
//! lattice spacing); every other length is in voxels.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LddmmError, Result};
use crate::field::Padding;
use crate::smoothing::{BoundaryPolicy, MAX_KERNELS};

/// One Gaussian of the sum-of-kernels regulariser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianKernelSpec {
    pub weight: f64,
    /// Standard deviation along x, y, z (mm)
    pub sigma: [f64; 3],
}

impl GaussianKernelSpec {
    pub fn isotropic(weight: f64, sigma: f64) -> Self {
        Self { weight, sigma: [sigma; 3] }
    }
}

/// How the energy gradient is regularised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMethod {
    /// Sum of Gaussians in the frequency domain
    Fft,
    /// Heat-equation relaxation with the sigma of the single kernel
    Diffusion,
}

impl Default for SmoothingMethod {
    fn default() -> Self {
        SmoothingMethod::Fft
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub kernels: Vec<GaussianKernelSpec>,
    pub boundary: BoundaryPolicy,
    pub method: SmoothingMethod,
    /// Keep one velocity component per kernel
    pub split_kernels: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernels: vec![GaussianKernelSpec::isotropic(1.0, 3.0)],
            boundary: BoundaryPolicy::Periodic,
            method: SmoothingMethod::Fft,
            split_kernels: false,
        }
    }
}

/// Weight and background values of one image channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSpec {
    pub weight: f64,
    /// Template intensities at or below this are background for grey-level alignment
    pub template_padding: f64,
    /// Target intensities at or below this are background for grey-level alignment
    pub target_padding: f64,
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self { weight: 1.0, template_padding: 0.0, target_padding: 0.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Per-channel settings; empty means every channel uses the defaults
    pub channels: Vec<ChannelSpec>,
    /// Rescale each template to its target's mean and spread before iterating
    pub grey_level_alignment: bool,
}

impl ChannelConfig {
    /// Settings for channel `c`
    pub fn channel(&self, c: usize) -> ChannelSpec {
        self.channels.get(c).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Iteration cap; 0 returns the initial velocity field untouched
    pub iteration_nb: usize,
    /// Stop once the gradient falls below this fraction of the reference gradient
    pub epsilon: f64,
    /// Largest velocity change per iteration (voxels)
    pub max_velocity_update: f64,
    /// Reference gradient carried over from an earlier run
    pub reference_gradient: Option<f64>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            iteration_nb: 10,
            epsilon: 0.1,
            max_velocity_update: 0.4,
            reference_gradient: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Number of virtual-time samples, including both ends
    pub nb_time_subdiv: usize,
}

impl TimeConfig {
    pub fn delta_time_subdiv(&self) -> f64 {
        1.0 / (self.nb_time_subdiv.max(2) - 1) as f64
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self { nb_time_subdiv: 10 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Voxels excluded from the data term on each face
    pub margin: usize,
    /// Image reads outside the lattice
    pub padding: Padding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Prepended to every output file name
    pub prefix: PathBuf,
    pub velocity_field: bool,
    pub jacobian: bool,
    pub flow_length: bool,
    pub forward_deformation: bool,
    pub inverse_deformation: bool,
    pub initial_momentum: bool,
    /// Log the SSD at every iteration at info level
    pub show_ssd: bool,
    /// Also write deformation, Jacobian and flow length of each kernel's
    /// velocity component when kernels are split
    pub split_outputs: bool,
    /// Mean flow length over the lattice and its evolution in time (JSON)
    pub flow_length_summary: bool,
    /// Save the velocity field and run state every N iterations
    pub checkpoint_every: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: PathBuf::new(),
            velocity_field: true,
            jacobian: false,
            flow_length: false,
            forward_deformation: false,
            inverse_deformation: false,
            initial_momentum: false,
            show_ssd: false,
            split_outputs: false,
            flow_length_summary: false,
            checkpoint_every: None,
        }
    }
}

/// Complete configuration of a registration run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub kernels: KernelConfig,
    pub channels: ChannelConfig,
    pub convergence: ConvergenceConfig,
    pub time: TimeConfig,
    pub region: RegionConfig,
    /// Weight of the kinetic term 2·w·v in the energy gradient
    pub velocity_weight: f64,
    pub output: OutputConfig,
    /// Resume from the velocity field recorded in `{prefix}run_state.json`
    /// (a final save or the latest checkpoint), or from
    /// `{prefix}velocity_field.nii.gz` when no run state exists
    pub resume_prefix: Option<PathBuf>,
}

impl RegistrationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LddmmError::io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject anything the solver cannot run with
    pub fn validate(&self) -> Result<()> {
        let kernels = &self.kernels.kernels;
        if kernels.is_empty() || kernels.len() > MAX_KERNELS {
            return Err(LddmmError::invalid_configuration(format!(
                "between 1 and {} kernels are supported, got {}",
                MAX_KERNELS,
                kernels.len()
            )));
        }
        for (k, spec) in kernels.iter().enumerate() {
            if spec.sigma.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
                return Err(LddmmError::invalid_configuration(format!(
                    "kernel {} sigma must be positive, got {:?}",
                    k, spec.sigma
                )));
            }
            if !(spec.weight.is_finite() && spec.weight >= 0.0) {
                return Err(LddmmError::invalid_configuration(format!(
                    "kernel {} weight must be finite and non-negative, got {}",
                    k, spec.weight
                )));
            }
        }
        if kernels.iter().map(|k| k.weight).sum::<f64>() <= 0.0 {
            return Err(LddmmError::invalid_configuration("at least one kernel weight must be positive"));
        }
        if self.kernels.method == SmoothingMethod::Diffusion && (kernels.len() > 1 || self.kernels.split_kernels) {
            return Err(LddmmError::invalid_configuration(
                "diffusion smoothing supports a single kernel without splitting",
            ));
        }

        for (c, ch) in self.channels.channels.iter().enumerate() {
            if !(ch.weight.is_finite() && ch.weight >= 0.0) {
                return Err(LddmmError::invalid_configuration(format!(
                    "channel {} weight must be finite and non-negative, got {}",
                    c, ch.weight
                )));
            }
            if !(ch.template_padding.is_finite() && ch.target_padding.is_finite()) {
                return Err(LddmmError::invalid_configuration(format!("channel {} padding must be finite", c)));
            }
        }

        let conv = &self.convergence;
        if !(conv.epsilon.is_finite() && conv.epsilon >= 0.0) {
            return Err(LddmmError::invalid_configuration(format!(
                "epsilon must be finite and non-negative, got {}",
                conv.epsilon
            )));
        }
        if !(conv.max_velocity_update.is_finite() && conv.max_velocity_update > 0.0) {
            return Err(LddmmError::invalid_configuration(format!(
                "max_velocity_update must be positive, got {}",
                conv.max_velocity_update
            )));
        }
        if let Some(r) = conv.reference_gradient {
            if !(r.is_finite() && r > 0.0) {
                return Err(LddmmError::invalid_configuration(format!(
                    "reference_gradient must be positive, got {}",
                    r
                )));
            }
        }

        if self.time.nb_time_subdiv < 2 {
            return Err(LddmmError::invalid_configuration(format!(
                "nb_time_subdiv must be at least 2, got {}",
                self.time.nb_time_subdiv
            )));
        }
        if let Padding::Constant(v) = self.region.padding {
            if !v.is_finite() {
                return Err(LddmmError::invalid_configuration("padding value must be finite"));
            }
        }
        if !(self.velocity_weight.is_finite() && self.velocity_weight >= 0.0) {
            return Err(LddmmError::invalid_configuration(format!(
                "velocity_weight must be finite and non-negative, got {}",
                self.velocity_weight
            )));
        }
        if self.output.checkpoint_every == Some(0) {
            return Err(LddmmError::invalid_configuration("checkpoint_every must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = RegistrationConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.kernels.kernels.len(), 1);
        assert_eq!(cfg.velocity_weight, 0.0);
        assert!((cfg.time.delta_time_subdiv() - 1.0 / 9.0).abs() < 1e-15);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg = RegistrationConfig::from_json_str(
            r#"{
                "kernels": { "kernels": [ { "weight": 1.0, "sigma": [2.0, 2.0, 1.0] } ], "boundary": "zero_padded" },
                "convergence": { "iteration_nb": 50, "epsilon": 0.01 },
                "region": { "margin": 2, "padding": { "mode": "constant", "value": 0.0 } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.kernels.boundary, BoundaryPolicy::ZeroPadded);
        assert_eq!(cfg.convergence.iteration_nb, 50);
        assert_eq!(cfg.convergence.max_velocity_update, 0.4);
        assert_eq!(cfg.region.padding, Padding::Constant(0.0));
        assert_eq!(cfg.time.nb_time_subdiv, 10);
        cfg.validate().unwrap();

        let back = RegistrationConfig::from_json_str(&cfg.to_json_string().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut cfg = RegistrationConfig::default();
        cfg.kernels.kernels[0].sigma = [2.0, 0.0, 2.0];
        assert!(cfg.validate().unwrap_err().is_configuration());

        let mut cfg = RegistrationConfig::default();
        cfg.kernels.kernels = vec![GaussianKernelSpec::isotropic(1.0, 1.0); 8];
        assert!(cfg.validate().is_err());

        let mut cfg = RegistrationConfig::default();
        cfg.time.nb_time_subdiv = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = RegistrationConfig::default();
        cfg.convergence.max_velocity_update = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = RegistrationConfig::default();
        cfg.kernels.method = SmoothingMethod::Diffusion;
        cfg.kernels.split_kernels = true;
        assert!(cfg.validate().is_err());

        let mut cfg = RegistrationConfig::default();
        cfg.output.checkpoint_every = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_channel_defaults() {
        let cfg = ChannelConfig {
            channels: vec![ChannelSpec { weight: 2.0, ..Default::default() }],
            grey_level_alignment: false,
        };
        assert_eq!(cfg.channel(0).weight, 2.0);
        assert_eq!(cfg.channel(3), ChannelSpec::default());
    }

    #[test]
    fn test_bad_json_is_io_error() {
        let err = RegistrationConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, LddmmError::Io(_)));
    }
}
