//! Laplacian relaxation smoother
//!
//! Runs the explicit heat equation on each component. Running it for time
//! σ²/2 approximates a Gaussian of standard deviation σ, so the smoother is
//! parameterised by the same sigma (mm) as [`crate::kernels::GaussianKernel`].
//! Boundaries are periodic. It is an alternative regulariser, not a bit-exact
//! replacement for the FFT convolver.

use tracing::debug;

use crate::error::{LddmmError, Result};
use crate::field::{Grid, VectorField};
use crate::utils::diffusion_step_inplace;

use super::SmoothingStrategy;

/// Largest per-axis step; the sum over three axes stays below 0.5
const MAX_AXIS_STEP: f64 = 0.15;

pub struct DiffusionSmoother {
    grid: Grid,
    sigma: [f64; 3],
    tau: [f64; 3],
    steps: usize,
    scratch: Vec<f64>,
}

impl DiffusionSmoother {
    pub fn new(grid: Grid, sigma: [f64; 3]) -> Result<Self> {
        if sigma.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
            return Err(LddmmError::invalid_configuration(format!(
                "diffusion sigma must be positive and finite, got {:?}",
                sigma
            )));
        }
        let voxels = grid.to_voxels(sigma);
        let max_var = voxels.iter().map(|s| s * s).fold(0.0, f64::max);
        let steps = (max_var / (2.0 * MAX_AXIS_STEP)).ceil().max(1.0) as usize;
        let tau = voxels.map(|s| s * s / (2.0 * steps as f64));
        debug!("diffusion smoother: sigma {:?}, {} steps, tau {:?}", sigma, steps, tau);
        Ok(Self { grid, sigma, tau, steps, scratch: vec![0.0; grid.len()] })
    }

    pub fn sigma(&self) -> [f64; 3] {
        self.sigma
    }

    /// Number of explicit steps per smoothing call
    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl SmoothingStrategy for DiffusionSmoother {
    fn name(&self) -> &str {
        "diffusion"
    }

    fn smooth(&mut self, field: &VectorField) -> Result<VectorField> {
        self.grid.check_same(field.grid())?;
        let g = self.grid;
        let mut out = field.clone();
        for axis in 0..3 {
            let comp = out.component_mut(axis);
            for _ in 0..self.steps {
                diffusion_step_inplace(&mut self.scratch, comp, g.nx, g.ny, g.nz, self.tau);
                comp.copy_from_slice(&self.scratch);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smoothing::{BoundaryPolicy, FftConvolver};

    #[test]
    fn test_step_count_keeps_scheme_stable() {
        let s = DiffusionSmoother::new(Grid::new(8, 8, 8), [2.0, 1.0, 3.0]).unwrap();
        assert_eq!(s.steps(), 30);
        assert!(s.tau.iter().sum::<f64>() <= 0.5);
        assert!(DiffusionSmoother::new(Grid::new(8, 8, 8), [1.0, -1.0, 1.0]).is_err());
    }

    #[test]
    fn test_sigma_is_in_mm() {
        let fine = Grid::new(8, 8, 8).with_spacing([0.5, 1.0, 1.5]);
        let s = DiffusionSmoother::new(fine, [1.0, 1.0, 4.5]).unwrap();
        // 2, 1 and 3 voxels
        assert_eq!(s.steps(), 30);
        assert!((s.tau[0] - 4.0 / 60.0).abs() < 1e-15);
        assert!((s.tau[2] - 9.0 / 60.0).abs() < 1e-15);
    }

    #[test]
    fn test_zero_and_mass() {
        let grid = Grid::new(10, 10, 10);
        let mut s = DiffusionSmoother::new(grid, [1.5, 1.5, 1.5]).unwrap();
        assert_eq!(s.smooth(&VectorField::zeros(grid)).unwrap().max_norm(), 0.0);

        let mut f = VectorField::zeros(grid);
        f.set(5, 5, 5, [1.0, 0.0, 0.0]);
        let out = s.smooth(&f).unwrap();
        let mass: f64 = out.component(0).iter().sum();
        assert!((mass - 1.0).abs() < 1e-10);
        assert!(out.get(5, 5, 5)[0] < 1.0);
    }

    #[test]
    fn test_close_to_gaussian_convolution() {
        let grid = Grid::new(24, 24, 24);
        let sigma = [2.0, 2.0, 2.0];
        let mut f = VectorField::zeros(grid);
        f.set(12, 12, 12, [1.0, 0.0, 0.0]);

        let a = DiffusionSmoother::new(grid, sigma).unwrap().smooth(&f).unwrap();
        let b = FftConvolver::gaussian(grid, &[(1.0, sigma)], BoundaryPolicy::Periodic)
            .unwrap()
            .smooth(&f)
            .unwrap();
        let peak = b.get(12, 12, 12)[0];
        let diff = a.sub(&b).unwrap().max_norm();
        assert!(diff < 0.1 * peak, "diff {} vs peak {}", diff, peak);
    }
}
