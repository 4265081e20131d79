use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{RegistrationConfig, SmoothingMethod};
use crate::energy::{weighted_ssd, ChannelFrame, EnergyGradientStrategy, SsdGradient, TimeFrame};
use crate::error::{LddmmError, Result};
use crate::field::{Grid, ScalarField, VectorField, VelocityField};
use crate::io::FieldStore;
use crate::smoothing::{DiffusionSmoother, FftConvolver, SmoothingStrategy};
use crate::transport::{apply_mapping, compute_mappings, determinant, TimeMapping};
use crate::utils::{central_gradient, region_mask};

use super::channels::{align_grey_levels, ChannelImages};
use super::result::{IterationRecord, RegistrationResult, Termination};

/// Gradients at or below this norm count as exactly converged
pub const GRADIENT_FLOOR: f64 = 1e-10;

/// Typical contribution of each kernel to the smoothed gradient
#[derive(Debug, Clone, PartialEq)]
pub struct KernelAmplitudes {
    /// Largest voxel norm of each kernel's smoothed data term
    pub amplitudes: Vec<f64>,
    /// Weights that would give every kernel the same amplitude, summing to 1
    pub suggested_weights: Vec<f64>,
}

/// Smoothed gradients and SSD of one evaluation
struct Evaluation {
    /// gradients[component][t]
    gradients: Vec<Vec<VectorField>>,
    max_gradient: f64,
    ssd: f64,
}

pub struct LddmmSolver {
    config: RegistrationConfig,
    grid: Grid,
    channels: Vec<ChannelImages>,
    weights: Vec<f64>,
    region: Vec<u8>,
    energy: Box<dyn EnergyGradientStrategy>,
    smoother: Box<dyn SmoothingStrategy>,
    /// One velocity per kernel when kernels are split, otherwise a single one
    components: Vec<VelocityField>,
    reference_gradient: Option<f64>,
    completed: usize,
}

impl LddmmSolver {
    /// Validate the run and prepare the initial (or resumed) velocity field
    ///
    /// Configuration, channel and lattice problems are reported before any
    /// field is allocated.
    pub fn new(
        config: RegistrationConfig,
        channels: Vec<ChannelImages>,
        mask: Option<ScalarField>,
    ) -> Result<Self> {
        config.validate()?;

        let first = channels
            .first()
            .ok_or(LddmmError::ChannelMismatch { expected: 1, actual: 0 })?;
        let grid = *first.template.grid();
        if grid.is_empty() {
            return Err(LddmmError::invalid_configuration("images have an empty lattice"));
        }
        for ch in &channels {
            grid.check_same(ch.template.grid())?;
            grid.check_same(ch.target.grid())?;
        }
        if let Some(m) = &mask {
            grid.check_same(m.grid())?;
        }
        let specs = &config.channels.channels;
        if !specs.is_empty() && specs.len() != channels.len() {
            return Err(LddmmError::ChannelMismatch { expected: specs.len(), actual: channels.len() });
        }

        let smoother: Box<dyn SmoothingStrategy> = match config.kernels.method {
            SmoothingMethod::Fft => {
                let kernels: Vec<(f64, [f64; 3])> =
                    config.kernels.kernels.iter().map(|k| (k.weight, k.sigma)).collect();
                Box::new(FftConvolver::gaussian(grid, &kernels, config.kernels.boundary)?)
            }
            SmoothingMethod::Diffusion => {
                Box::new(DiffusionSmoother::new(grid, config.kernels.kernels[0].sigma)?)
            }
        };

        let mut channels = channels;
        let weights: Vec<f64> = (0..channels.len()).map(|c| config.channels.channel(c).weight).collect();
        if config.channels.grey_level_alignment {
            for (c, ch) in channels.iter_mut().enumerate() {
                let spec = config.channels.channel(c);
                align_grey_levels(ch, spec.template_padding, spec.target_padding);
            }
        }

        let region = region_mask(&grid, config.region.margin, mask.as_ref());
        let nt = config.time.nb_time_subdiv;

        let mut components = vec![VelocityField::zeros(grid, nt)];
        let mut reference_gradient = config.convergence.reference_gradient;
        let mut completed = 0;
        if let Some(prefix) = &config.resume_prefix {
            let resume = FieldStore::new(prefix).load_resume()?;
            for v in std::iter::once(&resume.velocity).chain(resume.kernel_velocities.iter()) {
                grid.check_same(v.grid())?;
                if v.nt() != nt {
                    return Err(LddmmError::invalid_configuration(format!(
                        "resumed velocity field has {} time subdivisions, configuration asks for {}",
                        v.nt(),
                        nt
                    )));
                }
            }
            if let Some(state) = &resume.state {
                completed = state.iterations;
                reference_gradient = reference_gradient.or(state.reference_gradient);
            }
            let parts = resume.kernel_velocities.len();
            components = if config.kernels.split_kernels && parts > 1 && parts == smoother.kernel_count() {
                resume.kernel_velocities
            } else {
                vec![resume.velocity]
            };
            info!(
                "Resuming from {} after {} iteration(s), {} velocity component(s)",
                resume.source.display(),
                completed,
                components.len()
            );
        }

        let mut solver = Self {
            config,
            grid,
            channels,
            weights,
            region,
            energy: Box::new(SsdGradient),
            smoother,
            components,
            reference_gradient,
            completed,
        };
        solver.split_components();
        Ok(solver)
    }

    /// Replace the data term
    pub fn with_energy(mut self, energy: Box<dyn EnergyGradientStrategy>) -> Self {
        self.energy = energy;
        self
    }

    /// Replace the regulariser
    pub fn with_smoothing(mut self, smoother: Box<dyn SmoothingStrategy>) -> Self {
        self.smoother = smoother;
        self.split_components();
        self
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Iterations completed so far, including resumed ones
    pub fn iterations(&self) -> usize {
        self.completed
    }

    /// Current total velocity field
    pub fn velocity(&self) -> Result<VelocityField> {
        if self.components.len() == 1 {
            Ok(self.components[0].clone())
        } else {
            VelocityField::sum(&self.components)
        }
    }

    /// Match the velocity components to the smoother's kernel count
    fn split_components(&mut self) {
        let wanted = if self.config.kernels.split_kernels { self.smoother.kernel_count().max(1) } else { 1 };
        if self.components.len() == wanted {
            return;
        }
        let merged = self.velocity().unwrap_or_else(|_| self.components[0].clone());
        let grid = self.grid;
        let nt = merged.nt();
        self.components = std::iter::once(merged)
            .chain((1..wanted).map(|_| VelocityField::zeros(grid, nt)))
            .collect();
    }

    pub fn run(&mut self) -> Result<RegistrationResult> {
        self.run_with_progress(|_, _| {})
    }

    /// Run until convergence or the iteration cap, reporting (iteration, cap)
    pub fn run_with_progress<F>(&mut self, mut progress: F) -> Result<RegistrationResult>
    where
        F: FnMut(usize, usize),
    {
        let cap = self.config.convergence.iteration_nb;
        let epsilon = self.config.convergence.epsilon;
        let max_update = self.config.convergence.max_velocity_update;
        let checkpoint = self.config.output.checkpoint_every;
        let store = FieldStore::new(&self.config.output.prefix);

        info!(
            "LDDMM: lattice {:?}, {} channel(s), {} time subdivisions (dt {:.4}), smoothing {} ({} kernel(s))",
            self.grid.dims(),
            self.channels.len(),
            self.config.time.nb_time_subdiv,
            self.config.time.delta_time_subdiv(),
            self.smoother.name(),
            self.smoother.kernel_count()
        );

        let mut termination = Termination::IterationLimitReached;
        let mut history = Vec::new();

        for it in 0..cap {
            progress(it, cap);
            let iteration = self.completed;
            let eval = self.evaluate(iteration)?;

            let (reference, known) = match self.reference_gradient {
                Some(r) => (r, true),
                None => {
                    self.reference_gradient = Some(eval.max_gradient);
                    (eval.max_gradient, false)
                }
            };
            let ratio = if reference > 0.0 { eval.max_gradient / reference } else { 0.0 };
            self.log_iteration(iteration, eval.max_gradient, ratio, eval.ssd);

            if eval.max_gradient <= GRADIENT_FLOOR || (known && eval.max_gradient < epsilon * reference) {
                history.push(IterationRecord {
                    iteration,
                    max_gradient: eval.max_gradient,
                    reference_gradient: reference,
                    ssd: eval.ssd,
                    step: 0.0,
                });
                termination = Termination::Converged;
                info!("Converged at iteration {} (gradient ratio {:.5})", iteration, ratio);
                break;
            }

            let step = max_update / eval.max_gradient.max(reference);
            for (component, gradients) in self.components.iter_mut().zip(eval.gradients.iter()) {
                for (v, g) in component.frames_mut().iter_mut().zip(gradients.iter()) {
                    v.axpy(-step, g)?;
                }
            }
            for component in &self.components {
                if let Some((time, idx)) = component.first_non_finite() {
                    return Err(LddmmError::NumericDivergence {
                        iteration,
                        time,
                        voxel: self.grid.coords(idx),
                        what: "velocity field",
                    });
                }
            }

            history.push(IterationRecord {
                iteration,
                max_gradient: eval.max_gradient,
                reference_gradient: reference,
                ssd: eval.ssd,
                step,
            });
            self.completed += 1;

            if let Some(every) = checkpoint {
                if self.completed % every == 0 {
                    let velocity = self.velocity()?;
                    let parts: &[VelocityField] = if self.components.len() > 1 { &self.components } else { &[] };
                    store.save_checkpoint(&velocity, parts, self.completed, self.reference_gradient)?;
                    debug!("checkpoint saved after iteration {}", self.completed);
                }
            }
        }
        progress(cap, cap);

        if termination == Termination::IterationLimitReached && cap > 0 {
            info!("Iteration limit reached after {} iteration(s)", self.completed);
        }

        let velocity = self.velocity()?;
        let (forward, backward) = compute_mappings(&velocity);
        let initial_momentum = if self.config.output.initial_momentum {
            Some(self.initial_momentum(&backward)?)
        } else {
            None
        };

        Ok(RegistrationResult {
            velocity,
            split_velocities: if self.components.len() > 1 { Some(self.components.clone()) } else { None },
            forward,
            backward,
            termination,
            iterations: self.completed,
            reference_gradient: self.reference_gradient,
            history,
            margin: self.config.region.margin,
            initial_momentum,
        })
    }

    fn log_iteration(&self, iteration: usize, max_gradient: f64, ratio: f64, ssd: f64) {
        info!(
            "Iteration {}: max gradient {:.6e}, ratio {:.5}",
            iteration, max_gradient, ratio
        );
        if self.config.output.show_ssd {
            info!("Iteration {}: SSD at t=1 {:.6e}", iteration, ssd);
        } else {
            debug!("Iteration {}: SSD at t=1 {:.6e}", iteration, ssd);
        }
    }

    /// Unsmoothed data term at every time subdivision, plus the SSD at t = 1
    fn data_terms(&self, velocity: &VelocityField, iteration: usize) -> Result<(Vec<VectorField>, f64)> {
        let (forward, backward) = compute_mappings(velocity);
        let nt = velocity.nt();
        let padding = self.config.region.padding;
        let margin = self.config.region.margin;
        let channels = &self.channels;
        let weights = &self.weights;
        let region = &self.region;
        let energy = &self.energy;

        let per_time: Vec<(VectorField, Option<f64>)> = (0..nt)
            .into_par_iter()
            .map(|t| -> Result<(VectorField, Option<f64>)> {
                let det = determinant(backward.frame(t), margin);
                let mut deformed = Vec::with_capacity(channels.len());
                for ch in channels {
                    let j0 = apply_mapping(&ch.template, forward.frame(t), padding)?;
                    let j1 = apply_mapping(&ch.target, backward.frame(t), padding)?;
                    let grad = central_gradient(&j0);
                    deformed.push((j0, j1, grad));
                }
                let frames: Vec<ChannelFrame<'_>> = deformed
                    .iter()
                    .zip(weights.iter())
                    .map(|((j0, j1, grad), &weight)| ChannelFrame {
                        weight,
                        deformed_template: j0,
                        deformed_target: j1,
                        template_gradient: grad,
                    })
                    .collect();
                let frame = TimeFrame {
                    time: t,
                    channels: &frames,
                    backward_jacobian: &det,
                    region,
                };
                let gradient = energy.gradient(&frame)?;

                let ssd = if t + 1 == nt {
                    let pairs: Vec<(f64, &ScalarField, &ScalarField)> =
                        frames.iter().map(|f| (f.weight, f.deformed_template, f.deformed_target)).collect();
                    Some(weighted_ssd(&pairs, region)?)
                } else {
                    None
                };
                Ok((gradient, ssd))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut ssd = 0.0;
        let mut terms = Vec::with_capacity(nt);
        for (t, (gradient, s)) in per_time.into_iter().enumerate() {
            if let Some(idx) = gradient.first_non_finite() {
                return Err(LddmmError::NumericDivergence {
                    iteration,
                    time: t,
                    voxel: self.grid.coords(idx),
                    what: "energy gradient",
                });
            }
            if let Some(s) = s {
                ssd = s;
            }
            terms.push(gradient);
        }
        Ok((terms, ssd))
    }

    /// Smoothed energy gradient for every velocity component
    fn evaluate(&mut self, iteration: usize) -> Result<Evaluation> {
        let velocity = self.velocity()?;
        let (terms, ssd) = self.data_terms(&velocity, iteration)?;
        let nt = terms.len();
        let n_comp = self.components.len();
        let w_v = self.config.velocity_weight;

        let mut gradients: Vec<Vec<VectorField>> = (0..n_comp).map(|_| Vec::with_capacity(nt)).collect();
        let mut max_gradient: f64 = 0.0;

        for (t, term) in terms.iter().enumerate() {
            let smoothed = if n_comp > 1 {
                self.smoother.smooth_per_kernel(term)?
            } else {
                vec![self.smoother.smooth(term)?]
            };

            let mut total = VectorField::zeros(self.grid);
            for (c, s) in smoothed.into_iter().enumerate() {
                // GradE = 2 w_v v - 2 S
                let mut g = s.scale(-2.0);
                if w_v > 0.0 {
                    g.axpy(2.0 * w_v, self.components[c].frame(t))?;
                }
                total.axpy(1.0, &g)?;
                gradients[c].push(g);
            }

            if let Some(idx) = total.first_non_finite() {
                return Err(LddmmError::NumericDivergence {
                    iteration,
                    time: t,
                    voxel: self.grid.coords(idx),
                    what: "smoothed gradient",
                });
            }
            max_gradient = max_gradient.max(total.max_norm());
        }

        Ok(Evaluation { gradients, max_gradient, ssd })
    }

    /// (J0(0) - J1(0)) · det D B[0], summed over channels
    fn initial_momentum(&self, backward: &TimeMapping) -> Result<ScalarField> {
        let padding = self.config.region.padding;
        let det = determinant(backward.first_frame(), self.config.region.margin);
        let mut momentum = ScalarField::zeros(self.grid);
        for (ch, &w) in self.channels.iter().zip(self.weights.iter()) {
            let j0 = apply_mapping(&ch.template, &VectorField::identity(self.grid), padding)?;
            let j1 = apply_mapping(&ch.target, backward.first_frame(), padding)?;
            let diff = j0.sub(&j1)?;
            for (idx, m) in momentum.data_mut().iter_mut().enumerate() {
                if self.region[idx] != 0 {
                    *m += w * diff.data()[idx] * det.data()[idx];
                }
            }
        }
        Ok(momentum)
    }

    /// Amplitude of each kernel's smoothed data term at the current velocity
    ///
    /// Useful to balance multi-kernel weights before a run: the suggested
    /// weights equalise the kernels' contributions.
    pub fn measure_kernel_amplitudes(&mut self) -> Result<KernelAmplitudes> {
        let velocity = self.velocity()?;
        let (terms, _) = self.data_terms(&velocity, self.completed)?;
        let mut amplitudes = vec![0.0f64; self.smoother.kernel_count()];
        for term in &terms {
            for (k, s) in self.smoother.smooth_per_kernel(term)?.iter().enumerate() {
                if k < amplitudes.len() {
                    amplitudes[k] = amplitudes[k].max(s.max_norm());
                }
            }
        }

        let base: Vec<f64> = if self.config.kernels.method == SmoothingMethod::Fft
            && self.config.kernels.kernels.len() == amplitudes.len()
        {
            self.config.kernels.kernels.iter().map(|k| k.weight).collect()
        } else {
            vec![1.0; amplitudes.len()]
        };
        let raw: Vec<f64> = base
            .iter()
            .zip(amplitudes.iter())
            .map(|(&w, &a)| if a > 0.0 { w / a } else { w })
            .collect();
        let total: f64 = raw.iter().sum();
        let suggested_weights = if total > 0.0 { raw.iter().map(|w| w / total).collect() } else { raw };

        for (k, (a, w)) in amplitudes.iter().zip(suggested_weights.iter()).enumerate() {
            info!("Kernel {}: typical amplitude {:.6e}, suggested weight {:.4}", k, a, w);
        }
        Ok(KernelAmplitudes { amplitudes, suggested_weights })
    }
}

impl std::fmt::Debug for LddmmSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LddmmSolver")
            .field("grid", &self.grid)
            .field("channels", &self.channels.len())
            .field("energy", &self.energy.name())
            .field("smoother", &self.smoother.name())
            .field("components", &self.components.len())
            .field("reference_gradient", &self.reference_gradient)
            .field("completed", &self.completed)
            .finish()
    }
}
