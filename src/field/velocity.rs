use crate::error::{LddmmError, Result};

use super::{Grid, VectorField};

/// Time-indexed velocity field, one [`VectorField`] per virtual-time subdivision
///
/// Subdivision `t` sits at virtual time `t * delta_t()`, so the first frame is
/// time 0 (template) and the last one time 1 (target).
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityField {
    grid: Grid,
    frames: Vec<VectorField>,
}

impl VelocityField {
    /// Zero velocity at every subdivision (identity deformation)
    pub fn zeros(grid: Grid, nb_time_subdiv: usize) -> Self {
        Self {
            grid,
            frames: (0..nb_time_subdiv).map(|_| VectorField::zeros(grid)).collect(),
        }
    }

    pub fn from_frames(frames: Vec<VectorField>) -> Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| LddmmError::invalid_configuration("velocity field needs at least one frame"))?;
        let grid = *first.grid();
        for f in &frames {
            grid.check_same(f.grid())?;
        }
        Ok(Self { grid, frames })
    }

    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Number of time subdivisions
    #[inline]
    pub fn nt(&self) -> usize {
        self.frames.len()
    }

    /// Virtual time step between two subdivisions
    #[inline]
    pub fn delta_t(&self) -> f64 {
        if self.frames.len() > 1 {
            1.0 / (self.frames.len() - 1) as f64
        } else {
            1.0
        }
    }

    #[inline]
    pub fn frame(&self, t: usize) -> &VectorField {
        &self.frames[t]
    }

    pub fn frames(&self) -> &[VectorField] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [VectorField] {
        &mut self.frames
    }

    pub fn into_frames(self) -> Vec<VectorField> {
        self.frames
    }

    /// Largest voxelwise norm over all frames
    pub fn max_norm(&self) -> f64 {
        self.frames.iter().map(|f| f.max_norm()).fold(0.0, f64::max)
    }

    /// (time, voxel index) of the first non-finite value
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        self.frames
            .iter()
            .enumerate()
            .find_map(|(t, f)| f.first_non_finite().map(|idx| (t, idx)))
    }

    /// Frame-by-frame sum of several velocity fields on the same lattice
    pub fn sum(parts: &[VelocityField]) -> Result<VelocityField> {
        let first = parts
            .first()
            .ok_or_else(|| LddmmError::invalid_configuration("cannot sum zero velocity fields"))?;
        let mut out = first.clone();
        for p in &parts[1..] {
            if p.nt() != out.nt() {
                return Err(LddmmError::invalid_configuration(format!(
                    "velocity fields have {} and {} time subdivisions",
                    out.nt(),
                    p.nt()
                )));
            }
            for (dst, src) in out.frames.iter_mut().zip(p.frames.iter()) {
                dst.axpy(1.0, src)?;
            }
        }
        Ok(out)
    }
}
