// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Per-shot forward/adjoint port consumed by the inversion loop, and the
//! two travel-time tomography formulations that implement it.

/// Fast-sweeping adjoint-state gradient.
pub mod adjoint_state;
/// Ray-traced least-squares gradient.
pub mod least_squares;

pub use adjoint_state::AdjointState;
pub use least_squares::LeastSquares;

use crate::device::ComputeDevice;
use crate::error::{Result, TomographyError};

/// Gradient formulation, selected by `inversion_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InversionKind {
    /// Ray-traced travel-time sensitivities.
    LeastSquares = 0,
    /// Fast-sweeping adjoint-state gradient.
    AdjointState = 1,
}

impl InversionKind {
    /// Map the `inversion_type` code to a variant.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(InversionKind::LeastSquares),
            1 => Some(InversionKind::AdjointState),
            _ => None,
        }
    }
}

/// Closed interval of admissible slowness values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlownessBounds {
    /// Smallest slowness (fastest velocity).
    pub min: f64,
    /// Largest slowness (slowest velocity).
    pub max: f64,
}

impl SlownessBounds {
    /// Bounds from optional velocity limits; a missing side is unbounded.
    pub fn from_velocities(min_velocity: Option<f64>, max_velocity: Option<f64>) -> Result<Self> {
        for (key, v) in [("min_velocity", min_velocity), ("max_velocity", max_velocity)] {
            if let Some(v) = v {
                if !v.is_finite() || v <= 0.0 {
                    return Err(TomographyError::InvalidParameter {
                        key: key.to_string(),
                        reason: format!("{} must be positive", v),
                    });
                }
            }
        }
        if let (Some(lo), Some(hi)) = (min_velocity, max_velocity) {
            if lo >= hi {
                return Err(TomographyError::InvalidParameter {
                    key: "min_velocity".to_string(),
                    reason: format!("{} must be below max_velocity {}", lo, hi),
                });
            }
        }
        Ok(SlownessBounds {
            min: max_velocity.map_or(0.0, |v| 1.0 / v),
            max: min_velocity.map_or(f64::INFINITY, |v| 1.0 / v),
        })
    }

    /// Clamp one slowness value.
    pub fn clamp(&self, slowness: f64) -> f64 {
        slowness.clamp(self.min, self.max)
    }
}

/// L2 norm of `observed - calculated` over every shot.
pub fn l2_residual(observed: &[Vec<f64>], calculated: &[Vec<f64>]) -> f64 {
    observed
        .iter()
        .zip(calculated)
        .flat_map(|(obs, cal)| obs.iter().zip(cal).map(|(o, c)| (o - c) * (o - c)))
        .sum::<f64>()
        .sqrt()
}

/// Per-shot forward/adjoint evaluation.
///
/// The inversion loop calls, for each shot in order: [`set_shot`],
/// [`initial_conditions`], [`forward`], [`calculated_data`] and, except on
/// the final iteration, [`adjoint`].
///
/// [`set_shot`]: ShotSolver::set_shot
/// [`initial_conditions`]: ShotSolver::initial_conditions
/// [`forward`]: ShotSolver::forward
/// [`calculated_data`]: ShotSolver::calculated_data
/// [`adjoint`]: ShotSolver::adjoint
pub trait ShotSolver {
    /// Number of shots.
    fn total_shots(&self) -> usize;

    /// Number of data samples (receivers) of `shot`.
    fn data_len(&self, shot: usize) -> usize;

    /// Load the physical slowness model for the coming forward pass.
    fn prepare(&mut self, model: &[f64]) -> Result<()>;

    /// Select the shot to evaluate.
    fn set_shot(&mut self, shot: usize) -> Result<()>;

    /// Reset state and seed the current shot.
    fn initial_conditions(&mut self) -> Result<()>;

    /// Run the forward solve for the current shot.
    fn forward(&mut self) -> Result<()>;

    /// Calculated data of the current shot, `data_len` values.
    fn calculated_data(&self) -> Vec<f64>;

    /// Add the current shot's gradient contribution, given its observed
    /// data, to the physical-size `gradient`.
    fn adjoint(&mut self, observed: &[f64], gradient: &mut [f64]) -> Result<()>;

    /// Misfit over every shot.
    fn objective(&self, observed: &[Vec<f64>], calculated: &[Vec<f64>]) -> f64 {
        l2_residual(observed, calculated)
    }

    /// Apply a step: `model -= variation`, then clamp to `bounds`.
    fn update_model(&self, model: &mut [f64], variation: &[f64], bounds: Option<&SlownessBounds>) {
        for (m, v) in model.iter_mut().zip(variation) {
            *m -= v;
            if let Some(b) = bounds {
                *m = b.clamp(*m);
            }
        }
    }

    /// Device the solver runs on, if any. Controller-side kernels such as
    /// smoothing run there too.
    fn device(&self) -> Option<&dyn ComputeDevice> {
        None
    }
}
