//! Dense 3D fields on a uniform voxel lattice
//!
//! All volumes are stored flat in Fortran order (x varies fastest):
//! index = x + y*nx + z*nx*ny. Coordinates, velocities and displacements
//! are expressed in voxels.

mod grid;
mod interpolate;
mod scalar;
mod vector;
mod velocity;

pub use grid::Grid;
pub use interpolate::{trilinear, Padding};
pub use scalar::ScalarField;
pub use vector::VectorField;
pub use velocity::VelocityField;
