use serde::{Deserialize, Serialize};

use crate::error::{LddmmError, Result};
use crate::fft::idx3d;

/// Lattice shared by every field of a registration run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Voxel sizes in mm. Kernel widths are converted through it; every
    /// other length (displacements, margins, update bounds) is in voxels.
    pub spacing: [f64; 3],
}

impl Grid {
    /// Create a lattice with unit voxel spacing
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz, spacing: [1.0, 1.0, 1.0] }
    }

    pub fn with_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    /// Per-axis lengths in mm expressed in voxels
    #[inline]
    pub fn to_voxels(&self, lengths: [f64; 3]) -> [f64; 3] {
        [
            lengths[0] / self.spacing[0],
            lengths[1] / self.spacing[1],
            lengths[2] / self.spacing[2],
        ]
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        idx3d(i, j, k, self.nx, self.ny)
    }

    /// Inverse of [`Grid::index`]
    #[inline]
    pub fn coords(&self, idx: usize) -> [usize; 3] {
        let plane = self.nx * self.ny;
        let k = idx / plane;
        let rem = idx - k * plane;
        let j = rem / self.nx;
        [rem - j * self.nx, j, k]
    }

    /// True when the voxel is at least `margin` voxels away from every face
    #[inline]
    pub fn is_interior(&self, i: usize, j: usize, k: usize, margin: usize) -> bool {
        i >= margin && j >= margin && k >= margin
            && i + margin < self.nx && j + margin < self.ny && k + margin < self.nz
    }

    /// Fail fast unless both lattices have the same dimensions
    pub fn check_same(&self, other: &Grid) -> Result<()> {
        if self.dims() != other.dims() {
            return Err(LddmmError::ShapeMismatch {
                expected: self.dims(),
                actual: other.dims(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_coords_roundtrip() {
        let g = Grid::new(5, 4, 3);
        for idx in 0..g.len() {
            let [i, j, k] = g.coords(idx);
            assert_eq!(g.index(i, j, k), idx);
        }
    }

    #[test]
    fn test_interior() {
        let g = Grid::new(8, 8, 8);
        assert!(g.is_interior(2, 2, 2, 2));
        assert!(!g.is_interior(1, 4, 4, 2));
        assert!(!g.is_interior(4, 6, 4, 2));
        assert!(g.is_interior(0, 0, 0, 0));
    }

    #[test]
    fn test_check_same() {
        let a = Grid::new(4, 4, 4);
        let b = Grid::new(4, 4, 4).with_spacing([2.0, 2.0, 2.0]);
        assert!(a.check_same(&b).is_ok());
        assert!(a.check_same(&Grid::new(4, 5, 4)).is_err());
    }
}
