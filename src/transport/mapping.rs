use rayon::prelude::*;

use crate::error::Result;
use crate::field::{Padding, ScalarField, VectorField, VelocityField};

/// Mapping at every time subdivision, in absolute voxel coordinates
///
/// For the forward mapping, frame `t` sends a voxel at time `t` to where it
/// came from in the template (time 0). For the backward mapping, frame `t`
/// sends it to where it ends up in the target (time 1).
#[derive(Debug, Clone, PartialEq)]
pub struct TimeMapping {
    frames: Vec<VectorField>,
}

impl TimeMapping {
    /// Identity at every subdivision
    pub fn identity(grid: crate::field::Grid, nt: usize) -> Self {
        let id = VectorField::identity(grid);
        Self { frames: vec![id; nt] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn frame(&self, t: usize) -> &VectorField {
        &self.frames[t]
    }

    pub fn frames(&self) -> &[VectorField] {
        &self.frames
    }

    pub fn first_frame(&self) -> &VectorField {
        &self.frames[0]
    }

    pub fn final_frame(&self) -> &VectorField {
        &self.frames[self.frames.len() - 1]
    }

    /// Displacement (mapping minus identity) at subdivision `t`
    pub fn displacement(&self, t: usize) -> VectorField {
        self.frames[t].displacement()
    }
}

/// Integrate the velocity field into (forward, backward) mappings
///
/// Each step traces one subdivision back (forward mapping) or ahead
/// (backward mapping) with the velocity averaged between the two ends of
/// the step, then reads the neighbouring mapping there. Reads of a mapping
/// off the lattice extend its displacement with the nearest valid value, so
/// every coordinate is defined. A velocity field with one subdivision gives
/// identity mappings.
pub fn compute_mappings(velocity: &VelocityField) -> (TimeMapping, TimeMapping) {
    let grid = *velocity.grid();
    let nt = velocity.nt();
    let dt = velocity.delta_t();

    let mut forward = Vec::with_capacity(nt);
    let mut disp = VectorField::zeros(grid);
    forward.push(VectorField::identity(grid));
    for t in 1..nt {
        let next = advect(&disp, velocity.frame(t), velocity.frame(t - 1), -dt);
        disp = next.displacement();
        forward.push(next);
    }

    let mut backward = vec![VectorField::identity(grid); nt];
    let mut disp = VectorField::zeros(grid);
    for t in (0..nt.saturating_sub(1)).rev() {
        let next = advect(&disp, velocity.frame(t), velocity.frame(t + 1), dt);
        disp = next.displacement();
        backward[t] = next;
    }

    (TimeMapping { frames: forward }, TimeMapping { frames: backward })
}

/// One semi-Lagrangian step
///
/// out(x) = x' + prev_disp(x') with x' = x + h * (v_here(x) + v_there(x + h * v_here(x))) / 2
fn advect(prev_disp: &VectorField, v_here: &VectorField, v_there: &VectorField, h: f64) -> VectorField {
    let grid = *prev_disp.grid();
    let plane = grid.nx * grid.ny;
    let mut out = VectorField::zeros(grid);
    let [ox, oy, oz] = out.components_mut();

    ox.par_chunks_mut(plane)
        .zip(oy.par_chunks_mut(plane))
        .zip(oz.par_chunks_mut(plane))
        .enumerate()
        .for_each(|(k, ((ox_k, oy_k), oz_k))| {
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let local = i + j * grid.nx;
                    let (x, y, z) = (i as f64, j as f64, k as f64);

                    let a = v_here.at(local + k * plane);
                    let b = v_there.sample(x + h * a[0], y + h * a[1], z + h * a[2], Padding::Clamp);
                    let px = x + h * 0.5 * (a[0] + b[0]);
                    let py = y + h * 0.5 * (a[1] + b[1]);
                    let pz = z + h * 0.5 * (a[2] + b[2]);

                    let d = prev_disp.sample(px, py, pz, Padding::Clamp);
                    ox_k[local] = px + d[0];
                    oy_k[local] = py + d[1];
                    oz_k[local] = pz + d[2];
                }
            }
        });

    out
}

/// Image read through a mapping: out(x) = image(mapping(x))
pub fn apply_mapping(image: &ScalarField, mapping: &VectorField, padding: Padding) -> Result<ScalarField> {
    image.grid().check_same(mapping.grid())?;
    let [mx, my, mz] = mapping.components();
    let data: Vec<f64> = mx
        .par_iter()
        .zip(my.par_iter())
        .zip(mz.par_iter())
        .map(|((&x, &y), &z)| image.sample(x, y, z, padding))
        .collect();
    ScalarField::from_vec(*image.grid(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;

    fn uniform_velocity(grid: Grid, nt: usize, v: [f64; 3]) -> VelocityField {
        let mut vel = VelocityField::zeros(grid, nt);
        for f in vel.frames_mut() {
            for a in 0..3 {
                f.component_mut(a).iter_mut().for_each(|c| *c = v[a]);
            }
        }
        vel
    }

    #[test]
    fn test_zero_velocity_gives_identity() {
        let grid = Grid::new(6, 5, 4);
        let (fwd, bwd) = compute_mappings(&VelocityField::zeros(grid, 5));
        assert_eq!(fwd.len(), 5);
        for t in 0..5 {
            assert_eq!(fwd.displacement(t).max_norm(), 0.0);
            assert_eq!(bwd.displacement(t).max_norm(), 0.0);
        }
    }

    #[test]
    fn test_uniform_translation() {
        // Constant velocity u: the forward mapping at time t is x - t*u,
        // the backward mapping x + (1 - t)*u
        let grid = Grid::new(16, 16, 16);
        let u = [1.0, 0.5, 0.0];
        let vel = uniform_velocity(grid, 5, u);
        let (fwd, bwd) = compute_mappings(&vel);

        let last = fwd.final_frame().get(8, 8, 8);
        assert!((last[0] - 7.0).abs() < 1e-9, "{:?}", last);
        assert!((last[1] - 7.5).abs() < 1e-9);
        assert!((last[2] - 8.0).abs() < 1e-9);

        let first = bwd.first_frame().get(8, 8, 8);
        assert!((first[0] - 9.0).abs() < 1e-9, "{:?}", first);
        assert!((first[1] - 8.5).abs() < 1e-9);

        let mid = bwd.frame(2).get(8, 8, 8);
        assert!((mid[0] - 8.5).abs() < 1e-9);
    }

    #[test]
    fn test_forward_and_backward_are_inverse() {
        // Smooth, small velocity: F[last](B[0](x)) ~ x away from the faces
        let grid = Grid::new(20, 20, 20);
        let mut vel = VelocityField::zeros(grid, 6);
        for f in vel.frames_mut() {
            for idx in 0..grid.len() {
                let [i, j, _] = grid.coords(idx);
                let s = (i as f64 * std::f64::consts::PI / 19.0).sin();
                f.component_mut(0)[idx] = 0.5 * s * (j as f64 / 19.0);
            }
        }
        let (fwd, bwd) = compute_mappings(&vel);
        let f_last = fwd.final_frame();
        let b0 = bwd.first_frame();
        let mut worst: f64 = 0.0;
        for k in 4..16 {
            for j in 4..16 {
                for i in 4..16 {
                    let p = b0.get(i, j, k);
                    let back = f_last.sample(p[0], p[1], p[2], Padding::Clamp);
                    worst = worst.max((back[0] - i as f64).abs());
                }
            }
        }
        assert!(worst < 0.05, "composition error {}", worst);
    }

    #[test]
    fn test_apply_mapping_shift() {
        let grid = Grid::new(8, 4, 4);
        let image = ScalarField::from_fn(grid, |i, _, _| i as f64);
        let mut mapping = VectorField::identity(grid);
        mapping.component_mut(0).iter_mut().for_each(|x| *x += 0.5);
        let out = apply_mapping(&image, &mapping, Padding::Constant(-1.0)).unwrap();
        assert!((out.get(2, 1, 1) - 2.5).abs() < 1e-12);
        // 7.5 is past the half-voxel band
        assert_eq!(out.get(7, 1, 1), -1.0);
    }

    #[test]
    fn test_single_subdivision() {
        let grid = Grid::new(3, 3, 3);
        let (fwd, bwd) = compute_mappings(&uniform_velocity(grid, 1, [1.0, 0.0, 0.0]));
        assert_eq!(fwd.final_frame(), &VectorField::identity(grid));
        assert_eq!(bwd.first_frame(), &VectorField::identity(grid));
    }
}
