//! Frequency-domain sum-of-kernels convolver
//!
//! Each kernel is sampled on the FFT lattice and transformed once at
//! construction. Smoothing a vector field is then one forward and one
//! inverse FFT per component, with a pointwise product in between.

use tracing::debug;

use crate::error::{LddmmError, Result};
use crate::fft::{next_fast_len, Fft3dWorkspace};
use crate::field::{Grid, VectorField};
use crate::kernels::{GaussianKernel, KernelStrategy};

use super::{BoundaryPolicy, SmoothingStrategy};

/// Largest number of kernels in one convolver
pub const MAX_KERNELS: usize = 7;

/// A kernel and its (unnormalised) weight in the sum
#[derive(Debug)]
pub struct WeightedKernel {
    pub weight: f64,
    pub kernel: Box<dyn KernelStrategy>,
}

impl WeightedKernel {
    pub fn new(weight: f64, kernel: impl KernelStrategy + 'static) -> Self {
        Self { weight, kernel: Box::new(kernel) }
    }
}

/// Sum-of-kernels convolver with precomputed spectra
pub struct FftConvolver {
    grid: Grid,
    fft_grid: Grid,
    policy: BoundaryPolicy,
    workspace: Fft3dWorkspace,
    /// Weighted spectrum of each kernel (weights normalised to sum 1)
    spectra: Vec<Vec<f64>>,
    /// Sum of `spectra`
    combined: Vec<f64>,
    embed: Vec<f64>,
    result: Vec<f64>,
}

impl FftConvolver {
    /// Precompute the kernel spectra for fields on `grid`
    pub fn new(grid: Grid, kernels: Vec<WeightedKernel>, policy: BoundaryPolicy) -> Result<Self> {
        if kernels.is_empty() || kernels.len() > MAX_KERNELS {
            return Err(LddmmError::invalid_configuration(format!(
                "between 1 and {} kernels are supported, got {}",
                MAX_KERNELS,
                kernels.len()
            )));
        }
        if kernels.iter().any(|k| !(k.weight.is_finite() && k.weight >= 0.0)) {
            return Err(LddmmError::invalid_configuration("kernel weights must be finite and non-negative"));
        }
        let total_weight: f64 = kernels.iter().map(|k| k.weight).sum();
        if total_weight <= 0.0 {
            return Err(LddmmError::invalid_configuration("at least one kernel weight must be positive"));
        }
        if grid.is_empty() {
            return Err(LddmmError::invalid_configuration("cannot convolve on an empty lattice"));
        }

        let fft_grid = match policy {
            BoundaryPolicy::Periodic => grid,
            BoundaryPolicy::ZeroPadded => {
                let mut pad = [0usize; 3];
                for k in &kernels {
                    let r = k.kernel.support_radius(&grid);
                    for a in 0..3 {
                        pad[a] = pad[a].max(r[a]);
                    }
                }
                Grid::new(
                    next_fast_len(grid.nx + pad[0]),
                    next_fast_len(grid.ny + pad[1]),
                    next_fast_len(grid.nz + pad[2]),
                )
                .with_spacing(grid.spacing)
            }
        };

        let mut workspace = Fft3dWorkspace::new(fft_grid.nx, fft_grid.ny, fft_grid.nz);
        let mut spectra = Vec::with_capacity(kernels.len());
        let mut combined = vec![0.0; fft_grid.len()];

        for wk in &kernels {
            let w = wk.weight / total_weight;
            let mut spectrum = workspace.real_spectrum(&wk.kernel.spatial_kernel(&fft_grid));
            for (s, c) in spectrum.iter_mut().zip(combined.iter_mut()) {
                *s *= w;
                *c += *s;
            }
            spectra.push(spectrum);
        }

        let names: Vec<&str> = kernels.iter().map(|k| k.kernel.name()).collect();
        debug!(
            "FFT convolver: kernels {:?} on {:?} (image {:?}, {:?})",
            names,
            fft_grid.dims(),
            grid.dims(),
            policy
        );

        Ok(Self {
            grid,
            fft_grid,
            policy,
            workspace,
            spectra,
            combined,
            embed: vec![0.0; fft_grid.len()],
            result: vec![0.0; fft_grid.len()],
        })
    }

    /// Sum of anisotropic Gaussians given as (weight, sigma) pairs
    pub fn gaussian(grid: Grid, specs: &[(f64, [f64; 3])], policy: BoundaryPolicy) -> Result<Self> {
        let kernels = specs
            .iter()
            .map(|&(weight, sigma)| -> Result<WeightedKernel> {
                Ok(WeightedKernel::new(weight, GaussianKernel::new(sigma)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(grid, kernels, policy)
    }

    /// Lattice the FFTs run on (larger than the image lattice when zero padded)
    pub fn fft_grid(&self) -> &Grid {
        &self.fft_grid
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    /// Convolve one component by the combined spectrum (`None`) or a single kernel's
    fn convolve_component(&mut self, src: &[f64], dst: &mut [f64], kernel: Option<usize>) {
        let g = self.grid;
        let f = self.fft_grid;

        if f == g {
            self.embed.copy_from_slice(src);
        } else {
            self.embed.iter_mut().for_each(|v| *v = 0.0);
            for k in 0..g.nz {
                for j in 0..g.ny {
                    let s = g.index(0, j, k);
                    let d = f.index(0, j, k);
                    self.embed[d..d + g.nx].copy_from_slice(&src[s..s + g.nx]);
                }
            }
        }

        let spectrum = match kernel {
            None => &self.combined,
            Some(i) => &self.spectra[i],
        };
        self.workspace.apply_spectrum_inplace(&self.embed, spectrum, &mut self.result);

        if f == g {
            dst.copy_from_slice(&self.result);
        } else {
            for k in 0..g.nz {
                for j in 0..g.ny {
                    let s = f.index(0, j, k);
                    let d = g.index(0, j, k);
                    dst[d..d + g.nx].copy_from_slice(&self.result[s..s + g.nx]);
                }
            }
        }
    }

    fn convolve_field(&mut self, field: &VectorField, kernel: Option<usize>) -> Result<VectorField> {
        self.grid.check_same(field.grid())?;
        let mut out = VectorField::zeros(self.grid);
        for axis in 0..3 {
            self.convolve_component(field.component(axis), out.component_mut(axis), kernel);
        }
        Ok(out)
    }
}

impl SmoothingStrategy for FftConvolver {
    fn name(&self) -> &str {
        "fft-convolver"
    }

    fn kernel_count(&self) -> usize {
        self.spectra.len()
    }

    fn smooth(&mut self, field: &VectorField) -> Result<VectorField> {
        self.convolve_field(field, None)
    }

    fn smooth_per_kernel(&mut self, field: &VectorField) -> Result<Vec<VectorField>> {
        (0..self.spectra.len())
            .map(|k| self.convolve_field(field, Some(k)))
            .collect()
    }
}
