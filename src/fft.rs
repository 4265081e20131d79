//! FFT wrapper for 3D transforms using rustfft
//!
//! Complex-to-complex 3D transforms on Fortran-order (column-major) volumes,
//! with plans and scratch buffers cached per lattice. Used by the
//! frequency-domain convolver to apply precomputed kernel spectra.

use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

/// FFT workspace that caches plans and scratch buffers for reuse
pub struct Fft3dWorkspace {
    nx: usize,
    ny: usize,
    nz: usize,
    n_total: usize,
    // Forward FFT plans
    fft_x: Arc<dyn Fft<f64>>,
    fft_y: Arc<dyn Fft<f64>>,
    fft_z: Arc<dyn Fft<f64>>,
    // Inverse FFT plans
    ifft_x: Arc<dyn Fft<f64>>,
    ifft_y: Arc<dyn Fft<f64>>,
    ifft_z: Arc<dyn Fft<f64>>,
    // Scratch buffers
    scratch_x: Vec<Complex64>,
    scratch_y: Vec<Complex64>,
    scratch_z: Vec<Complex64>,
    buffer_y: Vec<Complex64>,
    buffer_z: Vec<Complex64>,
    // Full-volume transform buffer
    volume: Vec<Complex64>,
}

impl Fft3dWorkspace {
    /// Create a new FFT workspace for the given dimensions
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let mut planner = FftPlanner::new();

        let fft_x = planner.plan_fft(nx, FftDirection::Forward);
        let fft_y = planner.plan_fft(ny, FftDirection::Forward);
        let fft_z = planner.plan_fft(nz, FftDirection::Forward);

        let ifft_x = planner.plan_fft(nx, FftDirection::Inverse);
        let ifft_y = planner.plan_fft(ny, FftDirection::Inverse);
        let ifft_z = planner.plan_fft(nz, FftDirection::Inverse);

        let zero = Complex64::new(0.0, 0.0);
        let scratch_x = vec![zero; fft_x.get_inplace_scratch_len().max(ifft_x.get_inplace_scratch_len())];
        let scratch_y = vec![zero; fft_y.get_inplace_scratch_len().max(ifft_y.get_inplace_scratch_len())];
        let scratch_z = vec![zero; fft_z.get_inplace_scratch_len().max(ifft_z.get_inplace_scratch_len())];

        Self {
            nx, ny, nz,
            n_total: nx * ny * nz,
            fft_x, fft_y, fft_z,
            ifft_x, ifft_y, ifft_z,
            scratch_x, scratch_y, scratch_z,
            buffer_y: vec![zero; ny],
            buffer_z: vec![zero; nz],
            volume: vec![zero; nx * ny * nz],
        }
    }

    /// In-place forward 3D FFT
    pub fn fft3d(&mut self, data: &mut [Complex64]) {
        self.transform(data, FftDirection::Forward);
    }

    /// In-place inverse 3D FFT (with 1/N normalization)
    pub fn ifft3d(&mut self, data: &mut [Complex64]) {
        self.transform(data, FftDirection::Inverse);
        let n_total = self.n_total as f64;
        for val in data.iter_mut() {
            *val /= n_total;
        }
    }

    fn transform(&mut self, data: &mut [Complex64], direction: FftDirection) {
        debug_assert_eq!(data.len(), self.n_total);
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        let (plan_x, plan_y, plan_z) = match direction {
            FftDirection::Forward => (&self.fft_x, &self.fft_y, &self.fft_z),
            FftDirection::Inverse => (&self.ifft_x, &self.ifft_y, &self.ifft_z),
        };

        // x-axis: contiguous lines
        for line in data.chunks_exact_mut(nx) {
            plan_x.process_with_scratch(line, &mut self.scratch_x);
        }

        // y-axis: stride nx
        for k in 0..nz {
            for i in 0..nx {
                for j in 0..ny {
                    self.buffer_y[j] = data[idx3d(i, j, k, nx, ny)];
                }
                plan_y.process_with_scratch(&mut self.buffer_y, &mut self.scratch_y);
                for j in 0..ny {
                    data[idx3d(i, j, k, nx, ny)] = self.buffer_y[j];
                }
            }
        }

        // z-axis: stride nx*ny
        for j in 0..ny {
            for i in 0..nx {
                for k in 0..nz {
                    self.buffer_z[k] = data[idx3d(i, j, k, nx, ny)];
                }
                plan_z.process_with_scratch(&mut self.buffer_z, &mut self.scratch_z);
                for k in 0..nz {
                    data[idx3d(i, j, k, nx, ny)] = self.buffer_z[k];
                }
            }
        }
    }

    /// Real part of the spectrum of a real volume
    ///
    /// Exact for kernels that are even under periodic index reflection,
    /// whose spectrum is purely real.
    pub fn real_spectrum(&mut self, kernel: &[f64]) -> Vec<f64> {
        let mut buf: Vec<Complex64> = kernel.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        self.fft3d(&mut buf);
        buf.iter().map(|c| c.re).collect()
    }

    /// Convolution by a real spectrum: out = real(ifft(S * fft(x)))
    ///
    /// `x` and `out` live on this workspace's lattice.
    pub fn apply_spectrum_inplace(&mut self, x: &[f64], spectrum: &[f64], out: &mut [f64]) {
        let mut buf = std::mem::take(&mut self.volume);

        for (c, &r) in buf.iter_mut().zip(x.iter()) {
            *c = Complex64::new(r, 0.0);
        }

        self.fft3d(&mut buf);

        for (c, &s) in buf.iter_mut().zip(spectrum.iter()) {
            *c *= s;
        }

        self.ifft3d(&mut buf);

        for (o, c) in out.iter_mut().zip(buf.iter()) {
            *o = c.re;
        }

        self.volume = buf;
    }
}

/// Index into a 3D array stored in Fortran order (column-major)
/// index = x + y*nx + z*nx*ny
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Smallest length >= n whose only prime factors are 2, 3 and 5
///
/// rustfft handles any length, but these sizes keep the padded lattice fast.
pub fn next_fast_len(n: usize) -> usize {
    let mut m = n.max(1);
    loop {
        let mut r = m;
        for p in [2, 3, 5] {
            while r % p == 0 {
                r /= p;
            }
        }
        if r == 1 {
            return m;
        }
        m += 1;
    }
}
