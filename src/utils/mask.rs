//! Mask generation utilities
//!
//! Binary masks (1 = inside) in Fortran order, used to restrict the energy
//! gradient to the interior of the lattice and to exclude background voxels.

use crate::field::{Grid, ScalarField};

/// Voxels where the data term is evaluated
///
/// A voxel is active when it lies at least `margin` voxels from every face
/// and, if a mask is given, the mask value there is above 0.5.
///
/// # Arguments
/// * `grid` - Lattice of the run
/// * `margin` - Number of voxels excluded on each face
/// * `mask` - Optional region of interest on the same lattice
///
/// # Returns
/// Flattened binary mask of length nx*ny*nz
pub fn region_mask(grid: &Grid, margin: usize, mask: Option<&ScalarField>) -> Vec<u8> {
    let mut out = vec![0u8; grid.len()];

    for k in 0..grid.nz {
        for j in 0..grid.ny {
            for i in 0..grid.nx {
                if !grid.is_interior(i, j, k, margin) {
                    continue;
                }
                let idx = grid.index(i, j, k);
                let inside = mask.map_or(true, |m| m.data()[idx] > 0.5);
                if inside {
                    out[idx] = 1;
                }
            }
        }
    }

    out
}

/// Voxels strictly above `threshold` (foreground relative to a padding value)
pub fn threshold_mask(field: &ScalarField, threshold: f64) -> Vec<u8> {
    field.data().iter().map(|&v| if v > threshold { 1 } else { 0 }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_mask_margin() {
        let grid = Grid::new(6, 6, 6);
        let mask = region_mask(&grid, 1, None);
        let count: usize = mask.iter().map(|&m| m as usize).sum();
        assert_eq!(count, 4 * 4 * 4);
        assert_eq!(mask[grid.index(0, 3, 3)], 0);
        assert_eq!(mask[grid.index(1, 1, 1)], 1);
    }

    #[test]
    fn test_region_mask_with_roi() {
        let grid = Grid::new(4, 4, 4);
        let roi = ScalarField::from_fn(grid, |i, _, _| if i < 2 { 1.0 } else { 0.0 });
        let mask = region_mask(&grid, 0, Some(&roi));
        let count: usize = mask.iter().map(|&m| m as usize).sum();
        assert_eq!(count, 2 * 4 * 4);
    }

    #[test]
    fn test_threshold_mask() {
        let grid = Grid::new(3, 1, 1);
        let f = ScalarField::from_vec(grid, vec![0.0, 0.5, 2.0]).unwrap();
        assert_eq!(threshold_mask(&f, 0.0), vec![0, 1, 1]);
        assert_eq!(threshold_mask(&f, 1.0), vec![0, 0, 1]);
    }
}
