use rayon::prelude::*;

use crate::field::{Padding, ScalarField, VelocityField};

/// Trajectory length of the point starting at voxel `idx`, accumulated
/// after each subdivision (the first entry is 0)
fn cumulative_length(velocity: &VelocityField, idx: usize) -> Vec<f64> {
    let dt = velocity.delta_t();
    let steps = velocity.nt().saturating_sub(1);
    let c = velocity.grid().coords(idx);
    let mut p = [c[0] as f64, c[1] as f64, c[2] as f64];
    let mut lengths = Vec::with_capacity(steps + 1);
    let mut length = 0.0;
    lengths.push(length);
    for t in 0..steps {
        let v = velocity.frame(t).sample(p[0], p[1], p[2], Padding::Clamp);
        let step = [dt * v[0], dt * v[1], dt * v[2]];
        length += (step[0] * step[0] + step[1] * step[1] + step[2] * step[2]).sqrt();
        for a in 0..3 {
            p[a] += step[a];
        }
        lengths.push(length);
    }
    lengths
}

/// Length of each voxel's trajectory through the velocity field
///
/// Starting on the lattice at time 0, each point moves by `dt * v_t` per
/// subdivision (forward Euler in the Lagrangian frame) and the step norms
/// are summed. Velocities off the lattice take the nearest valid value.
pub fn flow_length(velocity: &VelocityField) -> ScalarField {
    let grid = *velocity.grid();
    let data: Vec<f64> = (0..grid.len())
        .into_par_iter()
        .map(|idx| cumulative_length(velocity, idx).last().copied().unwrap_or(0.0))
        .collect();

    ScalarField::from_parts(grid, data)
}

/// Mean trajectory length over the voxels `margin` away from every face,
/// after each time subdivision
///
/// The last entry is the global flow length of the run. Empty interiors
/// give zeros.
pub fn flow_length_evolution(velocity: &VelocityField, margin: usize) -> Vec<f64> {
    let grid = *velocity.grid();
    let nt = velocity.nt().max(1);
    let (sum, count) = (0..grid.len())
        .into_par_iter()
        .filter(|&idx| {
            let [i, j, k] = grid.coords(idx);
            grid.is_interior(i, j, k, margin)
        })
        .map(|idx| (cumulative_length(velocity, idx), 1usize))
        .reduce(
            || (vec![0.0; nt], 0),
            |(mut a, na), (b, nb)| {
                for (x, y) in a.iter_mut().zip(b.iter()) {
                    *x += y;
                }
                (a, na + nb)
            },
        );
    if count == 0 {
        return vec![0.0; nt];
    }
    sum.into_iter().map(|s| s / count as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;

    #[test]
    fn test_zero_velocity() {
        let f = flow_length(&VelocityField::zeros(Grid::new(4, 4, 4), 5));
        assert!(f.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_uniform_velocity_length() {
        let grid = Grid::new(10, 10, 10);
        let mut vel = VelocityField::zeros(grid, 6);
        for f in vel.frames_mut() {
            f.component_mut(0).iter_mut().for_each(|v| *v = 3.0);
            f.component_mut(1).iter_mut().for_each(|v| *v = 4.0);
        }
        let len = flow_length(&vel);
        assert!((len.get(2, 2, 2) - 5.0).abs() < 1e-12);
        assert!((len.get(9, 9, 9) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_evolution_grows_linearly_for_uniform_flow() {
        let grid = Grid::new(8, 8, 8);
        let mut vel = VelocityField::zeros(grid, 5);
        for f in vel.frames_mut() {
            f.component_mut(2).iter_mut().for_each(|v| *v = 2.0);
        }
        let evo = flow_length_evolution(&vel, 1);
        assert_eq!(evo.len(), 5);
        for (t, &l) in evo.iter().enumerate() {
            assert!((l - 0.5 * t as f64).abs() < 1e-12, "t={} length {}", t, l);
        }
        let total = flow_length(&vel);
        assert!((evo[4] - total.mean()).abs() < 1e-12);
    }

    #[test]
    fn test_evolution_ignores_margin_voxels() {
        let grid = Grid::new(6, 6, 6);
        let mut vel = VelocityField::zeros(grid, 3);
        // Motion only on the boundary faces
        for f in vel.frames_mut() {
            for idx in 0..grid.len() {
                let [i, j, k] = grid.coords(idx);
                if !grid.is_interior(i, j, k, 1) {
                    f.component_mut(0)[idx] = 1.0;
                }
            }
        }
        // Interior starts sit on zero velocity and never move
        let evo = flow_length_evolution(&vel, 1);
        assert!(evo.iter().all(|&l| l == 0.0), "{:?}", evo);
        assert_eq!(flow_length_evolution(&vel, 3), vec![0.0; 3]);
    }
}
