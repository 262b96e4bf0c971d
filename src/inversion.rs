// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Iterative inversion loop: forward pass, convergence check, capped
//! steepest-descent step, smoothing and model update.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::InversionConfig;
use crate::error::{Result, TomographyError};
use crate::grid::{Boundary, Grid};
use crate::io;
use crate::tomography::ShotSolver;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, no forward pass yet.
    Idle,
    /// At least one forward pass done, not converged.
    Iterating,
    /// The last convergence check reached `max_iteration`.
    Converged,
}

/// Compute a capped steepest-descent step into `variation`.
///
/// With `lambda = 0.5 * residual / sum(g^2)` the raw step is `lambda * g`;
/// when its largest component exceeds `max_variation` the whole step is
/// scaled down so that it equals `max_variation`.
///
/// Returns `false`, leaving `variation` zeroed, when `sum(g^2)` is zero or
/// not finite.
pub fn steepest_descent_step(
    gradient: &[f64],
    residual: f64,
    max_variation: f64,
    variation: &mut [f64],
) -> bool {
    let gmax = gradient.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
    let gdot: f64 = gradient.iter().map(|g| g * g).sum();

    if gdot == 0.0 || !gdot.is_finite() {
        variation.iter_mut().for_each(|v| *v = 0.0);
        return false;
    }

    let lambda = 0.5 * residual / gdot;
    let alpha = if lambda * gmax > max_variation {
        max_variation / (lambda * gmax)
    } else {
        1.0
    };

    for (v, g) in variation.iter_mut().zip(gradient) {
        *v = alpha * lambda * g;
    }
    true
}

/// Drives a [`ShotSolver`] through the inversion loop.
pub struct Inversion<S: ShotSolver> {
    solver: S,
    grid: Grid,
    config: InversionConfig,
    model: Vec<f64>,
    gradient: Vec<f64>,
    variation: Vec<f64>,
    observed: Vec<Vec<f64>>,
    calculated: Vec<Vec<f64>>,
    residuals: Vec<f64>,
    iteration: usize,
    phase: Phase,
    runtime_log: Option<PathBuf>,
    started: Instant,
}

impl<S: ShotSolver> Inversion<S> {
    /// Create a controller over an initial physical slowness `model`.
    pub fn new(solver: S, grid: Grid, model: Vec<f64>, config: InversionConfig) -> Result<Self> {
        let n = grid.n_points();
        if model.len() != n {
            return Err(TomographyError::ShapeMismatch {
                expected: vec![n],
                got: vec![model.len()],
            });
        }
        let calculated = (0..solver.total_shots())
            .map(|shot| vec![0.0; solver.data_len(shot)])
            .collect();
        Ok(Inversion {
            solver,
            grid,
            config,
            model,
            gradient: vec![0.0; n],
            variation: vec![0.0; n],
            observed: Vec::new(),
            calculated,
            residuals: Vec::new(),
            iteration: 0,
            phase: Phase::Idle,
            runtime_log: None,
            started: Instant::now(),
        })
    }

    /// Append a runtime block to `path` when exporting results (builder method).
    pub fn with_runtime_log(mut self, path: PathBuf) -> Self {
        self.runtime_log = Some(path);
        self
    }

    /// Read `<obs_data_folder>/<obs_data_prefix><shot + 1>.bin` for every shot.
    pub fn import_obs_data(&mut self) -> Result<()> {
        let observed = (0..self.solver.total_shots())
            .map(|shot| {
                let path = self
                    .config
                    .obs_data_folder
                    .join(format!("{}{}.bin", self.config.obs_data_prefix, shot + 1));
                io::read_binary_f32(&path, self.solver.data_len(shot))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(shots = observed.len(), "observed data imported");
        self.observed = observed;
        Ok(())
    }

    /// Install observed data directly, one vector per shot.
    pub fn set_observed_data(&mut self, observed: Vec<Vec<f64>>) -> Result<()> {
        let total = self.solver.total_shots();
        if observed.len() != total {
            return Err(TomographyError::ShapeMismatch {
                expected: vec![total],
                got: vec![observed.len()],
            });
        }
        for (shot, data) in observed.iter().enumerate() {
            let len = self.solver.data_len(shot);
            if data.len() != len {
                return Err(TomographyError::ShapeMismatch {
                    expected: vec![len],
                    got: vec![data.len()],
                });
            }
        }
        self.observed = observed;
        Ok(())
    }

    /// Model every shot with the current model; accumulate the gradient
    /// unless this is the final iteration.
    pub fn forward_pass(&mut self) -> Result<()> {
        if self.observed.len() != self.solver.total_shots() {
            return Err(TomographyError::Other(
                "observed data not loaded".to_string(),
            ));
        }
        self.solver.prepare(&self.model)?;
        let total = self.solver.total_shots();
        let final_pass = self.iteration == self.config.max_iteration;
        for shot in 0..total {
            info!(
                iteration = self.iteration,
                shot = shot + 1,
                total,
                "modeling shot"
            );
            self.solver.set_shot(shot)?;
            self.solver.initial_conditions()?;
            self.solver.forward()?;
            self.calculated[shot] = self.solver.calculated_data();
            if !final_pass {
                self.solver.adjoint(&self.observed[shot], &mut self.gradient)?;
            }
        }
        if self.phase == Phase::Idle {
            self.phase = Phase::Iterating;
        }
        Ok(())
    }

    /// Record the objective and advance the iteration counter. Returns
    /// `true` once `max_iteration` has been reached.
    pub fn check_convergence(&mut self) -> bool {
        let residual = self.solver.objective(&self.observed, &self.calculated);
        self.residuals.push(residual);
        info!(iteration = self.iteration, residual, "objective");

        if self.iteration >= self.config.max_iteration {
            self.phase = Phase::Converged;
            true
        } else {
            self.iteration += 1;
            false
        }
    }

    /// Turn the accumulated gradient into a capped step. Needs the
    /// objective of the current iteration from [`Inversion::check_convergence`].
    pub fn optimization(&mut self) -> Result<()> {
        let residual = self.residuals.last().copied().ok_or_else(|| {
            TomographyError::Other("optimization requires a convergence check first".to_string())
        })?;
        let applied = steepest_descent_step(
            &self.gradient,
            residual,
            self.config.max_slowness_variation,
            &mut self.variation,
        );
        if !applied {
            warn!(
                iteration = self.iteration,
                "gradient vanished or is not finite, skipping model step"
            );
        }
        Ok(())
    }

    /// Smooth the step if configured, apply it, clear the gradient and
    /// optionally write a model snapshot.
    pub fn model_update(&mut self) -> Result<()> {
        if let Some(smoother) = &self.config.smoothing {
            let padded_grid = self
                .grid
                .clone()
                .with_boundary(Boundary::uniform(smoother.radius()));
            let mut padded = vec![0.0; padded_grid.volsize()];
            padded_grid.expand(&self.variation, &mut padded)?;

            let mut smoothed = vec![0.0; padded.len()];
            let shape = padded_grid.padded_shape();
            let mut result = Ok(());
            let mut task = || result = smoother.smooth(&padded, &mut smoothed, shape);
            match self.solver.device() {
                Some(device) => {
                    device.run(&mut task);
                    device.synchronize();
                }
                None => task(),
            }
            result?;
            padded_grid.reduce(&smoothed, &mut self.variation)?;
            debug!(samples = smoother.samples(), "step smoothed");
        }

        self.solver.update_model(
            &mut self.model,
            &self.variation,
            self.config.bounds.as_ref(),
        );
        self.gradient.iter_mut().for_each(|g| *g = 0.0);

        if self.config.export_model_per_iteration {
            let name = io::volume_file_name(
                &format!("model_iteration_{}", self.iteration),
                &self.grid,
            );
            let path = self.config.estimated_model_folder.join(name);
            io::write_binary_f32(&path, &io::slowness_to_velocity(&self.model))?;
        }
        Ok(())
    }

    /// Write the final model, the convergence curve and the runtime report.
    pub fn export_results(&self) -> Result<()> {
        let name = io::volume_file_name("final_model", &self.grid);
        let path = self.config.estimated_model_folder.join(name);
        io::write_binary_f32(&path, &io::slowness_to_velocity(&self.model))?;

        let curve = self
            .config
            .convergence_folder
            .join(format!("convergence_{}_iterations.txt", self.iteration));
        io::write_residuals(&curve, &self.residuals)?;

        let elapsed = self.started.elapsed();
        let ram_mb = io::peak_ram_mb();
        let device_mb = self.solver.device().map_or(0, |d| d.memory_usage_mb());
        info!(
            seconds = elapsed.as_secs_f64(),
            ram_mb,
            device_mb,
            "inversion finished"
        );
        if let Some(log) = &self.runtime_log {
            io::append_runtime_log(log, elapsed, ram_mb, device_mb)?;
        }
        Ok(())
    }

    /// Run the loop to convergence and export the results.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.forward_pass()?;
            if self.check_convergence() {
                break;
            }
            self.optimization()?;
            self.model_update()?;
        }
        self.export_results()
    }

    /// Current physical slowness model.
    pub fn model(&self) -> &[f64] {
        &self.model
    }

    /// Accumulated gradient of the current iteration.
    pub fn gradient(&self) -> &[f64] {
        &self.gradient
    }

    /// Last computed step.
    pub fn variation(&self) -> &[f64] {
        &self.variation
    }

    /// Objective values, one per convergence check.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Calculated data of the last forward pass, one vector per shot.
    pub fn calculated(&self) -> &[Vec<f64>] {
        &self.calculated
    }

    /// Current iteration index.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Controller state.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The wrapped per-shot solver.
    pub fn solver(&self) -> &S {
        &self.solver
    }
}
