//! Common test utilities for LDDMM-core integration tests

#![allow(dead_code)]

use lddmm_core::config::GaussianKernelSpec;
use lddmm_core::{Grid, RegistrationConfig, ScalarField};

/// Install a test-friendly tracing subscriber once (RUST_LOG controls the level)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Isotropic Gaussian blob of the given amplitude centred at `centre`
pub fn gaussian_blob(grid: Grid, centre: [f64; 3], sigma: f64, amplitude: f64) -> ScalarField {
    ScalarField::from_fn(grid, |i, j, k| {
        let dx = i as f64 - centre[0];
        let dy = j as f64 - centre[1];
        let dz = k as f64 - centre[2];
        amplitude * (-(dx * dx + dy * dy + dz * dz) / (2.0 * sigma * sigma)).exp()
    })
}

/// Template blob at the centre of `grid` and the same blob shifted along x
///
/// Blob width and shift are in voxels.
pub fn blob_pair(grid: Grid, sigma: f64, shift: f64) -> (ScalarField, ScalarField) {
    let c = [grid.nx, grid.ny, grid.nz].map(|n| (n as f64 - 1.0) / 2.0);
    (
        gaussian_blob(grid, c, sigma, 100.0),
        gaussian_blob(grid, [c[0] + shift, c[1], c[2]], sigma, 100.0),
    )
}

/// [`blob_pair`] on an n³ unit-spacing lattice
pub fn shifted_pair(n: usize, sigma: f64, shift: f64) -> (ScalarField, ScalarField) {
    blob_pair(Grid::new(n, n, n), sigma, shift)
}

/// Voxels where the field exceeds half of its maximum
pub fn half_max_region(field: &ScalarField) -> Vec<u8> {
    let (_, max) = field.min_max();
    field.data().iter().map(|&v| if v > 0.5 * max { 1 } else { 0 }).collect()
}

/// Mean of `values` within mask (non-zero entries)
pub fn masked_mean(values: &[f64], mask: &[u8]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for (&v, &m) in values.iter().zip(mask.iter()) {
        if m > 0 {
            sum += v;
            n += 1;
        }
    }
    if n == 0 {
        return 0.0;
    }
    sum / n as f64
}

/// Compute RMSE between two arrays, only within mask (non-zero values)
pub fn rmse(a: &[f64], b: &[f64], mask: &[u8]) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for i in 0..a.len() {
        if mask[i] > 0 {
            let diff = a[i] - b[i];
            sum_sq += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// Largest absolute difference between two arrays
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

/// Single-kernel configuration used across the scenario tests
pub fn blob_config(sigma: f64, max_velocity_update: f64, epsilon: f64, iterations: usize) -> RegistrationConfig {
    let mut cfg = RegistrationConfig::default();
    cfg.kernels.kernels = vec![GaussianKernelSpec::isotropic(1.0, sigma)];
    cfg.convergence.max_velocity_update = max_velocity_update;
    cfg.convergence.epsilon = epsilon;
    cfg.convergence.iteration_nb = iterations;
    cfg.output.velocity_field = false;
    cfg
}
