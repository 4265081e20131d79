use crate::error::{LddmmError, Result};

use super::{trilinear, Grid, Padding};

/// Scalar volume on a [`Grid`]
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    grid: Grid,
    data: Vec<f64>,
}

impl ScalarField {
    /// Zero-filled field
    pub fn zeros(grid: Grid) -> Self {
        Self::filled(grid, 0.0)
    }

    pub fn filled(grid: Grid, value: f64) -> Self {
        Self { grid, data: vec![value; grid.len()] }
    }

    /// Wrap an existing Fortran-order buffer
    pub fn from_vec(grid: Grid, data: Vec<f64>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(LddmmError::invalid_configuration(format!(
                "buffer of {} values does not match lattice {:?} ({} voxels)",
                data.len(),
                grid.dims(),
                grid.len()
            )));
        }
        Ok(Self { grid, data })
    }

    /// Buffer already known to match the lattice
    pub(crate) fn from_parts(grid: Grid, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), grid.len());
        Self { grid, data }
    }

    /// Evaluate `f(i, j, k)` at every voxel
    pub fn from_fn<F>(grid: Grid, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(grid.len());
        for k in 0..grid.nz {
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    data.push(f(i, j, k));
                }
            }
        }
        Self { grid, data }
    }

    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.grid.index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.grid.index(i, j, k);
        self.data[idx] = value;
    }

    /// Trilinear read at a continuous voxel coordinate
    #[inline]
    pub fn sample(&self, x: f64, y: f64, z: f64, padding: Padding) -> f64 {
        let g = &self.grid;
        trilinear(&self.data, g.nx, g.ny, g.nz, x, y, z, padding)
    }

    /// Elementwise sum
    pub fn add(&self, other: &ScalarField) -> Result<ScalarField> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise difference `self - other`
    pub fn sub(&self, other: &ScalarField) -> Result<ScalarField> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn scale(&self, s: f64) -> ScalarField {
        Self {
            grid: self.grid,
            data: self.data.iter().map(|&v| v * s).collect(),
        }
    }

    fn zip_with<F: Fn(f64, f64) -> f64>(&self, other: &ScalarField, f: F) -> Result<ScalarField> {
        self.grid.check_same(&other.grid)?;
        Ok(Self {
            grid: self.grid,
            data: self.data.iter().zip(other.data.iter()).map(|(&a, &b)| f(a, b)).collect(),
        })
    }

    /// (min, max) over all voxels
    pub fn min_max(&self) -> (f64, f64) {
        self.data.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    /// Sum of squared differences against another field
    pub fn ssd(&self, other: &ScalarField) -> Result<f64> {
        self.grid.check_same(&other.grid)?;
        Ok(self.data.iter().zip(other.data.iter()).map(|(&a, &b)| (a - b) * (a - b)).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_length_check() {
        let g = Grid::new(2, 2, 2);
        assert!(ScalarField::from_vec(g, vec![0.0; 8]).is_ok());
        assert!(ScalarField::from_vec(g, vec![0.0; 7]).is_err());
    }

    #[test]
    fn test_get_set() {
        let mut f = ScalarField::zeros(Grid::new(3, 4, 5));
        f.set(2, 3, 4, 9.0);
        assert_eq!(f.get(2, 3, 4), 9.0);
        assert_eq!(f.data()[2 + 3 * 3 + 4 * 12], 9.0);
    }

    #[test]
    fn test_arithmetic() {
        let g = Grid::new(2, 2, 2);
        let a = ScalarField::filled(g, 3.0);
        let b = ScalarField::filled(g, 1.0);
        assert!(a.add(&b).unwrap().data().iter().all(|&v| v == 4.0));
        assert!(a.sub(&b).unwrap().data().iter().all(|&v| v == 2.0));
        assert!(a.scale(0.5).data().iter().all(|&v| v == 1.5));
        assert_eq!(a.ssd(&b).unwrap(), 32.0);
    }

    #[test]
    fn test_mismatched_shapes_fail_fast() {
        let a = ScalarField::zeros(Grid::new(2, 2, 2));
        let b = ScalarField::zeros(Grid::new(2, 2, 3));
        assert!(matches!(a.add(&b), Err(LddmmError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_from_fn_order() {
        let f = ScalarField::from_fn(Grid::new(3, 2, 2), |i, j, k| (i + 10 * j + 100 * k) as f64);
        assert_eq!(f.get(2, 1, 1), 112.0);
        assert_eq!(f.min_max(), (0.0, 112.0));
    }
}
