//! NIfTI-1 persistence for fields and run state
//!
//! Fields are written as float64 volumes of up to five dimensions, gzip
//! compressed when the path ends in `.nii.gz`:
//! - scalar fields: (x, y, z)
//! - vector fields: (x, y, z, 1, 3) with the vector intent
//! - velocity fields: (x, y, z, t, 3)
//!
//! [`FieldStore`] names the files of one run after a caller-supplied prefix.

use std::ffi::OsString;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::ArrayD;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiObject};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OutputConfig;
use crate::error::{LddmmError, Result};
use crate::field::{Grid, ScalarField, VectorField, VelocityField};
use crate::solver::RegistrationResult;
use crate::transport::FoldingReport;

const NIFTI_FLOAT64: i16 = 64;
const NIFTI_INTENT_VECTOR: i16 = 1007;

/// Decoded volume: Fortran-order data with five logical dimensions
struct NiftiVolume {
    data: Vec<f64>,
    dims: [usize; 5],
    spacing: [f64; 3],
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn is_gz_path(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Encode a float64 NIfTI-1 single file (.nii)
fn encode_nifti(data: &[f64], dims: &[usize], spacing: [f64; 3], intent: i16) -> Result<Vec<u8>> {
    if dims.is_empty() || dims.len() > 7 {
        return Err(LddmmError::io(format!("unsupported NIfTI rank {}", dims.len())));
    }
    if dims.iter().product::<usize>() != data.len() {
        return Err(LddmmError::io(format!(
            "NIfTI dims {:?} do not match {} values",
            dims,
            data.len()
        )));
    }

    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let mut dim = [1i16; 8];
    dim[0] = dims.len() as i16;
    for (d, &n) in dim[1..].iter_mut().zip(dims.iter()) {
        *d = i16::try_from(n)
            .map_err(|_| LddmmError::io(format!("dimension {} exceeds the NIfTI-1 limit", n)))?;
    }
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    header[68..70].copy_from_slice(&intent.to_le_bytes());
    header[70..72].copy_from_slice(&NIFTI_FLOAT64.to_le_bytes());
    // bitpix
    header[72..74].copy_from_slice(&64i16.to_le_bytes());

    let pixdim: [f32; 8] = [1.0, spacing[0] as f32, spacing[1] as f32, spacing[2] as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    // scl_slope = 1, scl_inter = 0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());

    // sform_code = 1, axis-aligned with the voxel spacing
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for axis in 0..3 {
        let offset = 280 + axis * 16 + axis * 4;
        header[offset..offset + 4].copy_from_slice(&(spacing[axis] as f32).to_le_bytes());
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + data.len() * 8);
    buffer.write_all(&header)?;
    buffer.write_all(&[0u8; 4])?;
    for &val in data {
        buffer.write_all(&val.to_le_bytes())?;
    }
    Ok(buffer)
}

fn write_volume(path: &Path, data: &[f64], dims: &[usize], spacing: [f64; 3], intent: i16) -> Result<()> {
    let raw = encode_nifti(data, dims, spacing, intent)?;
    let bytes = if is_gz_path(path) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()?
    } else {
        raw
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, &bytes)
        .map_err(|e| LddmmError::io(format!("failed to write '{}': {}", path.display(), e)))?;
    debug!("wrote {} ({:?})", path.display(), dims);
    Ok(())
}

fn read_volume(path: &Path) -> Result<NiftiVolume> {
    let bytes = std::fs::read(path)
        .map_err(|e| LddmmError::io(format!("failed to read '{}': {}", path.display(), e)))?;

    let obj = if is_gzip(&bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(&bytes[..])))
    } else {
        InMemNiftiObject::from_reader(Cursor::new(&bytes[..]))
    }
    .map_err(|e| LddmmError::io(format!("failed to parse NIfTI '{}': {}", path.display(), e)))?;

    let pixdim = obj.header().pixdim;
    let spacing = [1usize, 2, 3].map(|a| {
        let p = pixdim[a] as f64;
        if p > 0.0 { p } else { 1.0 }
    });

    let array: ArrayD<f64> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| LddmmError::io(format!("failed to decode '{}': {}", path.display(), e)))?;

    let shape = array.shape();
    if shape.len() < 3 || shape.len() > 5 {
        return Err(LddmmError::io(format!(
            "'{}' has {} dimensions, expected 3 to 5",
            path.display(),
            shape.len()
        )));
    }
    let mut dims = [1usize; 5];
    dims[..shape.len()].copy_from_slice(shape);

    // Reversed axes iterate x fastest: Fortran order
    let data: Vec<f64> = array.t().iter().copied().collect();

    Ok(NiftiVolume { data, dims, spacing })
}

fn volume_grid(vol: &NiftiVolume) -> Grid {
    Grid::new(vol.dims[0], vol.dims[1], vol.dims[2]).with_spacing(vol.spacing)
}

pub fn save_scalar_field(path: impl AsRef<Path>, field: &ScalarField) -> Result<()> {
    let g = field.grid();
    write_volume(path.as_ref(), field.data(), &[g.nx, g.ny, g.nz], g.spacing, 0)
}

pub fn load_scalar_field(path: impl AsRef<Path>) -> Result<ScalarField> {
    let vol = read_volume(path.as_ref())?;
    if vol.dims[3] != 1 || vol.dims[4] != 1 {
        return Err(LddmmError::io(format!(
            "'{}' is not a scalar volume: {:?}",
            path.as_ref().display(),
            vol.dims
        )));
    }
    let grid = volume_grid(&vol);
    ScalarField::from_vec(grid, vol.data)
}

/// Save a vector field as (x, y, z, 1, 3)
pub fn save_vector_field(path: impl AsRef<Path>, field: &VectorField) -> Result<()> {
    let g = field.grid();
    let mut data = Vec::with_capacity(3 * g.len());
    for c in field.components() {
        data.extend_from_slice(c);
    }
    write_volume(path.as_ref(), &data, &[g.nx, g.ny, g.nz, 1, 3], g.spacing, NIFTI_INTENT_VECTOR)
}

pub fn load_vector_field(path: impl AsRef<Path>) -> Result<VectorField> {
    let vol = read_volume(path.as_ref())?;
    if vol.dims[3] != 1 || vol.dims[4] != 3 {
        return Err(LddmmError::io(format!(
            "'{}' is not a 3-component vector field: {:?}",
            path.as_ref().display(),
            vol.dims
        )));
    }
    let grid = volume_grid(&vol);
    let n = grid.len();
    let comps = [
        vol.data[..n].to_vec(),
        vol.data[n..2 * n].to_vec(),
        vol.data[2 * n..].to_vec(),
    ];
    VectorField::from_components(grid, comps)
}

/// Save a velocity field as (x, y, z, t, 3)
pub fn save_velocity_field(path: impl AsRef<Path>, velocity: &VelocityField) -> Result<()> {
    let g = velocity.grid();
    let nt = velocity.nt();
    let mut data = Vec::with_capacity(3 * nt * g.len());
    for axis in 0..3 {
        for frame in velocity.frames() {
            data.extend_from_slice(frame.component(axis));
        }
    }
    write_volume(path.as_ref(), &data, &[g.nx, g.ny, g.nz, nt, 3], g.spacing, NIFTI_INTENT_VECTOR)
}

pub fn load_velocity_field(path: impl AsRef<Path>) -> Result<VelocityField> {
    let vol = read_volume(path.as_ref())?;
    if vol.dims[4] != 3 {
        return Err(LddmmError::io(format!(
            "'{}' is not a velocity field: {:?}",
            path.as_ref().display(),
            vol.dims
        )));
    }
    let grid = volume_grid(&vol);
    let n = grid.len();
    let nt = vol.dims[3];
    let frames = (0..nt)
        .map(|t| {
            let slice = |axis: usize| {
                let start = (axis * nt + t) * n;
                vol.data[start..start + n].to_vec()
            };
            VectorField::from_components(grid, [slice(0), slice(1), slice(2)])
        })
        .collect::<Result<Vec<_>>>()?;
    VelocityField::from_frames(frames)
}

const VELOCITY_FILE: &str = "velocity_field.nii.gz";

/// Progress needed to resume a run deterministically
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunState {
    pub iterations: usize,
    pub reference_gradient: Option<f64>,
    /// Total velocity file of this state, relative to the prefix
    #[serde(default)]
    pub velocity: Option<String>,
    /// Per-kernel velocity files when kernels are split, relative to the prefix
    #[serde(default)]
    pub kernel_velocities: Vec<String>,
}

impl RunState {
    pub fn new(iterations: usize, reference_gradient: Option<f64>) -> Self {
        Self { iterations, reference_gradient, ..Self::default() }
    }
}

/// Velocity fields and progress loaded from a previous run
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub velocity: VelocityField,
    /// Per-kernel components, empty when the run did not split kernels
    pub kernel_velocities: Vec<VelocityField>,
    pub state: Option<RunState>,
    /// File the total velocity was read from
    pub source: PathBuf,
}

/// File naming for the outputs of one run
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStore {
    prefix: PathBuf,
}

impl FieldStore {
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self { prefix: prefix.as_ref().to_path_buf() }
    }

    /// `{prefix}{name}`; the prefix is a string prefix, not a directory
    pub fn path(&self, name: &str) -> PathBuf {
        let mut s: OsString = self.prefix.clone().into_os_string();
        s.push(name);
        PathBuf::from(s)
    }

    pub fn velocity_path(&self) -> PathBuf {
        self.path(VELOCITY_FILE)
    }

    pub fn checkpoint_path(&self, iteration: usize) -> PathBuf {
        self.path(&checkpoint_name(iteration))
    }

    pub fn kernel_velocity_path(&self, kernel: usize) -> PathBuf {
        self.path(&kernel_velocity_name(kernel))
    }

    pub fn kernel_checkpoint_path(&self, kernel: usize, iteration: usize) -> PathBuf {
        self.path(&kernel_checkpoint_name(kernel, iteration))
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.path("run_state.json")
    }

    pub fn save_velocity(&self, velocity: &VelocityField) -> Result<()> {
        save_velocity_field(self.velocity_path(), velocity)
    }

    pub fn load_velocity(&self) -> Result<VelocityField> {
        load_velocity_field(self.velocity_path())
    }

    /// Write the velocity (and its kernel components) under `names`, then
    /// record them in the run state
    fn save_state(
        &self,
        velocity: &VelocityField,
        parts: &[VelocityField],
        names: (String, Vec<String>),
        iterations: usize,
        reference_gradient: Option<f64>,
    ) -> Result<RunState> {
        let (total, kernel_names) = names;
        save_velocity_field(self.path(&total), velocity)?;
        for (part, name) in parts.iter().zip(kernel_names.iter()) {
            save_velocity_field(self.path(name), part)?;
        }
        let state = RunState {
            iterations,
            reference_gradient,
            velocity: Some(total),
            kernel_velocities: kernel_names,
        };
        self.save_run_state(&state)?;
        Ok(state)
    }

    /// Save a resumable checkpoint after `iteration` completed iterations
    ///
    /// `parts` holds the per-kernel components when kernels are split.
    pub fn save_checkpoint(
        &self,
        velocity: &VelocityField,
        parts: &[VelocityField],
        iteration: usize,
        reference_gradient: Option<f64>,
    ) -> Result<RunState> {
        let names = (
            checkpoint_name(iteration),
            (0..parts.len()).map(|k| kernel_checkpoint_name(k, iteration)).collect(),
        );
        self.save_state(velocity, parts, names, iteration, reference_gradient)
    }

    /// Save the final velocity of a run under the resumable names
    pub fn save_final(
        &self,
        velocity: &VelocityField,
        parts: &[VelocityField],
        iterations: usize,
        reference_gradient: Option<f64>,
    ) -> Result<RunState> {
        let names = (VELOCITY_FILE.to_string(), (0..parts.len()).map(kernel_velocity_name).collect());
        self.save_state(velocity, parts, names, iterations, reference_gradient)
    }

    pub fn save_run_state(&self, state: &RunState) -> Result<()> {
        let path = self.run_state_path();
        std::fs::write(&path, serde_json::to_string_pretty(state)?)
            .map_err(|e| LddmmError::io(format!("failed to write '{}': {}", path.display(), e)))
    }

    /// Stored run state, or `None` when the run never saved one
    pub fn load_run_state(&self) -> Result<Option<RunState>> {
        let path = self.run_state_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| LddmmError::io(format!("failed to read '{}': {}", path.display(), e)))?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Load what a resumed run starts from
    ///
    /// The files recorded in the run state win. Without a run state, or
    /// when it records no file, `velocity_field.nii.gz` and any consecutive
    /// `velocity_field_kernel{k}.nii.gz` files are read.
    pub fn load_resume(&self) -> Result<ResumePoint> {
        let state = self.load_run_state()?;
        let recorded = state.as_ref().and_then(|s| s.velocity.as_deref());
        let source = match recorded {
            Some(name) => self.path(name),
            None => self.velocity_path(),
        };
        let velocity = load_velocity_field(&source)?;

        let kernel_paths: Vec<PathBuf> = match &state {
            Some(s) if recorded.is_some() => s.kernel_velocities.iter().map(|n| self.path(n)).collect(),
            _ => (0..)
                .map(|k| self.kernel_velocity_path(k))
                .take_while(|p| p.exists())
                .collect(),
        };
        let kernel_velocities = kernel_paths
            .iter()
            .map(load_velocity_field)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "resume point {} with {} kernel component(s)",
            source.display(),
            kernel_velocities.len()
        );
        Ok(ResumePoint { velocity, kernel_velocities, state, source })
    }
}

fn checkpoint_name(iteration: usize) -> String {
    format!("velocity_field_iter{:04}.nii.gz", iteration)
}

fn kernel_velocity_name(kernel: usize) -> String {
    format!("velocity_field_kernel{}.nii.gz", kernel)
}

fn kernel_checkpoint_name(kernel: usize, iteration: usize) -> String {
    format!("velocity_field_kernel{}_iter{:04}.nii.gz", kernel, iteration)
}

/// Write the outputs selected in `output` under its prefix
///
/// The run state is always written next to the velocity field so the run
/// can be resumed. Returns the folding report when the Jacobian was saved.
pub fn save_outputs(result: &RegistrationResult, output: &OutputConfig) -> Result<Option<FoldingReport>> {
    let store = FieldStore::new(&output.prefix);

    if output.velocity_field {
        let parts = result.split_velocities.as_deref().unwrap_or(&[]);
        store.save_final(&result.velocity, parts, result.iterations, result.reference_gradient)?;
    }
    if output.forward_deformation {
        save_vector_field(store.path("forward_deformation.nii.gz"), &result.forward_deformation())?;
    }
    if output.inverse_deformation {
        save_vector_field(store.path("inverse_deformation.nii.gz"), &result.inverse_deformation())?;
    }
    if output.flow_length {
        save_scalar_field(store.path("flow_length.nii.gz"), &result.flow_length())?;
    }
    if output.flow_length_summary {
        let summary = result.flow_length_summary();
        let path = store.path("flow_length.json");
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)
            .map_err(|e| LddmmError::io(format!("failed to write '{}': {}", path.display(), e)))?;
        info!("Global flow length {:.6}", summary.global);
    }
    if output.initial_momentum {
        if let Some(m) = result.initial_momentum() {
            save_scalar_field(store.path("initial_momentum.nii.gz"), m)?;
        }
    }
    if output.split_outputs && (output.forward_deformation || output.jacobian || output.flow_length) {
        for (k, part) in result.kernel_contributions().iter().enumerate() {
            if output.forward_deformation {
                save_vector_field(
                    store.path(&format!("forward_deformation_kernel{}.nii.gz", k)),
                    &part.forward_deformation,
                )?;
            }
            if output.jacobian {
                save_scalar_field(store.path(&format!("det_jacobian_kernel{}.nii.gz", k)), &part.jacobian.determinant)?;
            }
            if output.flow_length {
                save_scalar_field(store.path(&format!("flow_length_kernel{}.nii.gz", k)), &part.flow_length)?;
            }
        }
    }
    if output.jacobian {
        let jac = result.jacobian();
        save_scalar_field(store.path("det_jacobian.nii.gz"), &jac.determinant)?;
        return Ok(Some(jac.report));
    }
    Ok(None)
}
