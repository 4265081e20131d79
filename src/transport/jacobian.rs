use rayon::prelude::*;
use tracing::warn;

use crate::field::{ScalarField, VectorField};
use crate::utils::central_gradient_inplace;

/// Determinants at or below this value count as folding
pub const FOLDING_THRESHOLD: f64 = 1e-6;

/// Summary of non-positive determinants on the interior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoldingReport {
    pub min: f64,
    pub max: f64,
    /// Number of voxels with determinant <= [`FOLDING_THRESHOLD`]
    pub folded: usize,
    pub first_folded: Option<[usize; 3]>,
}

impl FoldingReport {
    pub fn has_folding(&self) -> bool {
        self.folded > 0
    }
}

/// Jacobian determinant map plus its folding diagnostics
#[derive(Debug, Clone)]
pub struct JacobianField {
    pub determinant: ScalarField,
    pub report: FoldingReport,
}

/// Determinant of the spatial derivative of a mapping
///
/// The derivative is taken on the displacement by central differences and
/// the identity added back, so an identity mapping yields exactly 1. Voxels
/// within `margin` of a face are set to 1 and left out of the report.
/// Folding is logged, never clamped.
pub fn jacobian_determinant(mapping: &VectorField, margin: usize) -> JacobianField {
    let grid = *mapping.grid();
    let det = determinant(mapping, margin);

    let mut report = FoldingReport {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        folded: 0,
        first_folded: None,
    };
    for (idx, &v) in det.data().iter().enumerate() {
        let [i, j, k] = grid.coords(idx);
        if !grid.is_interior(i, j, k, margin) {
            continue;
        }
        report.min = report.min.min(v);
        report.max = report.max.max(v);
        if !(v > FOLDING_THRESHOLD) {
            report.folded += 1;
            if report.first_folded.is_none() {
                report.first_folded = Some([i, j, k]);
            }
        }
    }
    if report.min > report.max {
        // Margin covers the whole lattice
        report.min = 1.0;
        report.max = 1.0;
    }
    if report.has_folding() {
        warn!(
            "mapping folds at {} voxel(s), first at {:?}, min determinant {:.4}",
            report.folded, report.first_folded, report.min
        );
    }

    JacobianField { determinant: det, report }
}

/// Determinant map only, without diagnostics
pub(crate) fn determinant(mapping: &VectorField, margin: usize) -> ScalarField {
    let grid = *mapping.grid();
    let (nx, ny, nz) = (grid.nx, grid.ny, grid.nz);
    let n = grid.len();
    let disp = mapping.displacement();

    // d[a][b]: derivative of component a along axis b
    let mut d: [[Vec<f64>; 3]; 3] = Default::default();
    for (a, row) in d.iter_mut().enumerate() {
        let [gx, gy, gz] = row;
        *gx = vec![0.0; n];
        *gy = vec![0.0; n];
        *gz = vec![0.0; n];
        central_gradient_inplace(gx, gy, gz, disp.component(a), nx, ny, nz);
    }

    let det: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|idx| {
            let [i, j, k] = grid.coords(idx);
            if !grid.is_interior(i, j, k, margin) {
                return 1.0;
            }
            let m = |a: usize, b: usize| d[a][b][idx] + if a == b { 1.0 } else { 0.0 };
            m(0, 0) * (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1))
                - m(0, 1) * (m(1, 0) * m(2, 2) - m(1, 2) * m(2, 0))
                + m(0, 2) * (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0))
        })
        .collect();

    ScalarField::from_parts(grid, det)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;

    #[test]
    fn test_identity_is_exactly_one() {
        let grid = Grid::new(5, 4, 3);
        let jac = jacobian_determinant(&VectorField::identity(grid), 0);
        assert!(jac.determinant.data().iter().all(|&v| v == 1.0));
        assert_eq!(jac.report.folded, 0);
        assert_eq!((jac.report.min, jac.report.max), (1.0, 1.0));
    }

    #[test]
    fn test_flat_lattice() {
        let grid = Grid::new(6, 6, 1);
        let jac = jacobian_determinant(&VectorField::identity(grid), 0);
        assert!(jac.determinant.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_uniform_scaling() {
        let grid = Grid::new(6, 6, 6);
        let scaled = VectorField::identity(grid).scale(1.5);
        let jac = jacobian_determinant(&scaled, 0);
        assert!(jac.determinant.data().iter().all(|&v| (v - 3.375).abs() < 1e-12));
    }

    #[test]
    fn test_folding_reported() {
        let grid = Grid::new(8, 8, 8);
        let mut mapping = VectorField::identity(grid);
        // Mirror along x: negative determinant everywhere
        for v in mapping.component_mut(0).iter_mut() {
            *v = 7.0 - *v;
        }
        let jac = jacobian_determinant(&mapping, 2);
        assert_eq!(jac.report.folded, 4 * 4 * 4);
        assert_eq!(jac.report.first_folded, Some([2, 2, 2]));
        assert!((jac.report.min + 1.0).abs() < 1e-12);
        // Margin voxels are reset to 1
        assert_eq!(jac.determinant.get(0, 0, 0), 1.0);
    }
}
