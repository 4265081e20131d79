use rayon::prelude::*;

use crate::error::{LddmmError, Result};

use super::{trilinear, Grid, Padding, ScalarField};

/// Three co-located scalar components (x, y, z) on a [`Grid`]
///
/// Used both for velocities/displacements and for mappings, which hold
/// absolute continuous voxel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    grid: Grid,
    comps: [Vec<f64>; 3],
}

impl VectorField {
    pub fn zeros(grid: Grid) -> Self {
        let n = grid.len();
        Self { grid, comps: [vec![0.0; n], vec![0.0; n], vec![0.0; n]] }
    }

    /// Identity mapping: every voxel holds its own coordinate
    pub fn identity(grid: Grid) -> Self {
        let mut field = Self::zeros(grid);
        for idx in 0..grid.len() {
            let [i, j, k] = grid.coords(idx);
            field.comps[0][idx] = i as f64;
            field.comps[1][idx] = j as f64;
            field.comps[2][idx] = k as f64;
        }
        field
    }

    pub fn from_components(grid: Grid, comps: [Vec<f64>; 3]) -> Result<Self> {
        for c in &comps {
            if c.len() != grid.len() {
                return Err(LddmmError::invalid_configuration(format!(
                    "vector component of {} values does not match lattice {:?}",
                    c.len(),
                    grid.dims()
                )));
            }
        }
        Ok(Self { grid, comps })
    }

    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    #[inline]
    pub fn component(&self, axis: usize) -> &[f64] {
        &self.comps[axis]
    }

    #[inline]
    pub fn component_mut(&mut self, axis: usize) -> &mut [f64] {
        &mut self.comps[axis]
    }

    pub fn components(&self) -> &[Vec<f64>; 3] {
        &self.comps
    }

    pub fn components_mut(&mut self) -> &mut [Vec<f64>; 3] {
        &mut self.comps
    }

    pub fn into_components(self) -> [Vec<f64>; 3] {
        self.comps
    }

    /// One component as a standalone scalar field
    pub fn component_field(&self, axis: usize) -> ScalarField {
        ScalarField::from_parts(self.grid, self.comps[axis].clone())
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        self.at(self.grid.index(i, j, k))
    }

    #[inline]
    pub fn at(&self, idx: usize) -> [f64; 3] {
        [self.comps[0][idx], self.comps[1][idx], self.comps[2][idx]]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, v: [f64; 3]) {
        let idx = self.grid.index(i, j, k);
        self.comps[0][idx] = v[0];
        self.comps[1][idx] = v[1];
        self.comps[2][idx] = v[2];
    }

    /// Trilinear read of all three components
    #[inline]
    pub fn sample(&self, x: f64, y: f64, z: f64, padding: Padding) -> [f64; 3] {
        let g = &self.grid;
        [
            trilinear(&self.comps[0], g.nx, g.ny, g.nz, x, y, z, padding),
            trilinear(&self.comps[1], g.nx, g.ny, g.nz, x, y, z, padding),
            trilinear(&self.comps[2], g.nx, g.ny, g.nz, x, y, z, padding),
        ]
    }

    /// self += alpha * other
    pub fn axpy(&mut self, alpha: f64, other: &VectorField) -> Result<()> {
        self.grid.check_same(&other.grid)?;
        for (dst, src) in self.comps.iter_mut().zip(other.comps.iter()) {
            dst.par_iter_mut().zip(src.par_iter()).for_each(|(d, &s)| *d += alpha * s);
        }
        Ok(())
    }

    pub fn add(&self, other: &VectorField) -> Result<VectorField> {
        let mut out = self.clone();
        out.axpy(1.0, other)?;
        Ok(out)
    }

    pub fn sub(&self, other: &VectorField) -> Result<VectorField> {
        let mut out = self.clone();
        out.axpy(-1.0, other)?;
        Ok(out)
    }

    pub fn scale(&self, s: f64) -> VectorField {
        let mut out = self.clone();
        for c in out.comps.iter_mut() {
            c.iter_mut().for_each(|v| *v *= s);
        }
        out
    }

    /// Euclidean norm at one voxel
    #[inline]
    pub fn norm_at(&self, idx: usize) -> f64 {
        let [a, b, c] = self.at(idx);
        (a * a + b * b + c * c).sqrt()
    }

    /// Largest voxelwise Euclidean norm
    pub fn max_norm(&self) -> f64 {
        (0..self.grid.len())
            .into_par_iter()
            .map(|idx| self.norm_at(idx))
            .reduce(|| 0.0, f64::max)
    }

    /// First voxel index holding a NaN or infinite component
    pub fn first_non_finite(&self) -> Option<usize> {
        (0..self.grid.len()).find(|&idx| self.comps.iter().any(|c| !c[idx].is_finite()))
    }

    /// Mapping minus the identity, i.e. the displacement it encodes
    pub fn displacement(&self) -> VectorField {
        let mut out = self.clone();
        let grid = self.grid;
        for idx in 0..grid.len() {
            let p = grid.coords(idx);
            for a in 0..3 {
                out.comps[a][idx] -= p[a] as f64;
            }
        }
        out
    }

    /// Identity plus this displacement
    pub fn to_mapping(&self) -> VectorField {
        let mut out = self.clone();
        let grid = self.grid;
        for idx in 0..grid.len() {
            let p = grid.coords(idx);
            for a in 0..3 {
                out.comps[a][idx] += p[a] as f64;
            }
        }
        out
    }
}
