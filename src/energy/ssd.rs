use rayon::prelude::*;

use crate::error::{LddmmError, Result};
use crate::field::{ScalarField, VectorField};

use super::{EnergyGradientStrategy, TimeFrame};

/// Sum of squared differences data term
///
/// Gradient: Σ_c w_c (J0_c - J1_c) · det(D φ_{t→1}) · ∇J0_c
#[derive(Debug, Clone, Copy, Default)]
pub struct SsdGradient;

impl EnergyGradientStrategy for SsdGradient {
    fn name(&self) -> &str {
        "ssd"
    }

    fn gradient(&self, frame: &TimeFrame<'_>) -> Result<VectorField> {
        let det = frame.backward_jacobian;
        let grid = *det.grid();
        for c in frame.channels {
            grid.check_same(c.deformed_template.grid())?;
            grid.check_same(c.deformed_target.grid())?;
            grid.check_same(c.template_gradient.grid())?;
        }
        if frame.region.len() != grid.len() {
            return Err(LddmmError::invalid_configuration(format!(
                "region of {} voxels does not match lattice {:?}",
                frame.region.len(),
                grid.dims()
            )));
        }

        let mut out = VectorField::zeros(grid);
        let [gx, gy, gz] = out.components_mut();
        let det = det.data();

        gx.par_iter_mut()
            .zip(gy.par_iter_mut())
            .zip(gz.par_iter_mut())
            .enumerate()
            .for_each(|(idx, ((x, y), z))| {
                if frame.region[idx] == 0 {
                    return;
                }
                let mut acc = [0.0; 3];
                for c in frame.channels {
                    let diff = c.deformed_template.data()[idx] - c.deformed_target.data()[idx];
                    let s = c.weight * diff * det[idx];
                    let g = c.template_gradient.at(idx);
                    acc[0] += s * g[0];
                    acc[1] += s * g[1];
                    acc[2] += s * g[2];
                }
                *x = acc[0];
                *y = acc[1];
                *z = acc[2];
            });

        Ok(out)
    }
}

/// Channel-weighted SSD between deformed templates and targets over a region
pub fn weighted_ssd(pairs: &[(f64, &ScalarField, &ScalarField)], region: &[u8]) -> Result<f64> {
    let mut total = 0.0;
    for &(weight, a, b) in pairs {
        a.grid().check_same(b.grid())?;
        let ssd: f64 = a
            .data()
            .iter()
            .zip(b.data().iter())
            .zip(region.iter())
            .filter(|(_, r)| **r != 0)
            .map(|((&x, &y), _)| (x - y) * (x - y))
            .sum();
        total += weight * ssd;
    }
    Ok(total)
}
