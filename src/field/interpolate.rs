use serde::{Deserialize, Serialize};

/// Value returned for reads outside the lattice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Padding {
    /// Nearest valid voxel value
    Clamp,
    /// Fixed background value outside `[-0.5, dim - 0.5)`
    Constant(f64),
}

impl Default for Padding {
    fn default() -> Self {
        Padding::Clamp
    }
}

/// Trilinear interpolation at a continuous voxel coordinate
///
/// Points in the half-voxel band around the lattice are clamped onto it.
/// Points further out return the padding value (or the nearest voxel for
/// [`Padding::Clamp`]). Never panics for finite or non-finite coordinates.
#[inline]
pub fn trilinear(
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    x: f64,
    y: f64,
    z: f64,
    padding: Padding,
) -> f64 {
    if let Padding::Constant(value) = padding {
        let outside = !(x >= -0.5 && y >= -0.5 && z >= -0.5)
            || x >= nx as f64 - 0.5
            || y >= ny as f64 - 0.5
            || z >= nz as f64 - 0.5;
        if outside {
            return value;
        }
    }

    // f64::max ignores NaN, so non-finite coordinates land on the lattice
    let x = x.max(0.0).min((nx - 1) as f64);
    let y = y.max(0.0).min((ny - 1) as f64);
    let z = z.max(0.0).min((nz - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let z0 = z.floor() as usize;
    let x1 = (x0 + 1).min(nx - 1);
    let y1 = (y0 + 1).min(ny - 1);
    let z1 = (z0 + 1).min(nz - 1);

    let xd = x - x0 as f64;
    let yd = y - y0 as f64;
    let zd = z - z0 as f64;

    let idx = |i: usize, j: usize, k: usize| i + j * nx + k * nx * ny;

    let c00 = data[idx(x0, y0, z0)] * (1.0 - xd) + data[idx(x1, y0, z0)] * xd;
    let c01 = data[idx(x0, y0, z1)] * (1.0 - xd) + data[idx(x1, y0, z1)] * xd;
    let c10 = data[idx(x0, y1, z0)] * (1.0 - xd) + data[idx(x1, y1, z0)] * xd;
    let c11 = data[idx(x0, y1, z1)] * (1.0 - xd) + data[idx(x1, y1, z1)] * xd;

    let c0 = c00 * (1.0 - yd) + c10 * yd;
    let c1 = c01 * (1.0 - yd) + c11 * yd;

    c0 * (1.0 - zd) + c1 * zd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(nx: usize, ny: usize, nz: usize) -> Vec<f64> {
        let mut d = vec![0.0; nx * ny * nz];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    d[i + j * nx + k * nx * ny] = i as f64 + 10.0 * j as f64 + 100.0 * k as f64;
                }
            }
        }
        d
    }

    #[test]
    fn test_exact_on_lattice() {
        let d = ramp(4, 3, 2);
        let v = trilinear(&d, 4, 3, 2, 2.0, 1.0, 1.0, Padding::Clamp);
        assert!((v - 112.0).abs() < 1e-12);
    }

    #[test]
    fn test_linear_between_voxels() {
        // Trilinear interpolation reproduces affine functions exactly
        let d = ramp(4, 4, 4);
        let v = trilinear(&d, 4, 4, 4, 1.25, 2.5, 0.75, Padding::Clamp);
        assert!((v - (1.25 + 25.0 + 75.0)).abs() < 1e-10);
    }

    #[test]
    fn test_constant_padding_outside() {
        let d = ramp(4, 4, 4);
        assert_eq!(trilinear(&d, 4, 4, 4, -0.6, 1.0, 1.0, Padding::Constant(-7.0)), -7.0);
        assert_eq!(trilinear(&d, 4, 4, 4, 1.0, 3.5, 1.0, Padding::Constant(-7.0)), -7.0);
        // Inside the half-voxel band: clamped onto the face
        let v = trilinear(&d, 4, 4, 4, -0.4, 0.0, 0.0, Padding::Constant(-7.0));
        assert!((v - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_outside() {
        let d = ramp(4, 4, 4);
        let v = trilinear(&d, 4, 4, 4, 10.0, -3.0, 1.0, Padding::Clamp);
        assert!((v - (3.0 + 0.0 + 100.0)).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_coordinates_are_defined() {
        let d = ramp(4, 4, 4);
        assert!(trilinear(&d, 4, 4, 4, f64::NAN, 1.0, 1.0, Padding::Clamp).is_finite());
        assert_eq!(trilinear(&d, 4, 4, 4, f64::NAN, 1.0, 1.0, Padding::Constant(0.0)), 0.0);
        assert!(trilinear(&d, 4, 4, 4, f64::INFINITY, 1.0, 1.0, Padding::Clamp).is_finite());
    }
}
