//! LDDMM-Core: diffeomorphic image registration
//!
//! This crate implements Beg-style Large Deformation Diffeomorphic Metric
//! Mapping: gradient descent over a time-discretised velocity field whose
//! integration yields a smooth, invertible mapping from a template onto a
//! target image.
//!
//! # Modules
//! - `field`: Scalar, vector and velocity fields on a voxel lattice
//! - `fft`: 3D FFT operations using rustfft
//! - `kernels`: Gaussian reproducing kernels
//! - `smoothing`: Sum-of-kernels FFT convolver and diffusion smoother
//! - `transport`: Semi-Lagrangian mappings, Jacobians, flow length
//! - `energy`: Data-term gradients (SSD)
//! - `solver`: Gradient-descent driver and registration results
//! - `config`: Run configuration (serde / JSON)
//! - `io`: NIfTI persistence of fields and run state
//! - `utils`: Finite differences and masks

// Core modules
pub mod error;
pub mod fft;
pub mod field;

// Algorithm modules
pub mod kernels;
pub mod smoothing;
pub mod transport;
pub mod energy;
pub mod solver;
pub mod utils;

// Configuration and I/O
pub mod config;
pub mod io;

pub use config::RegistrationConfig;
pub use error::{LddmmError, Result};
pub use field::{Grid, Padding, ScalarField, VectorField, VelocityField};
pub use solver::{ChannelImages, LddmmSolver, RegistrationResult, Termination};
