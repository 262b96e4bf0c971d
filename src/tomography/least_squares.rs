// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use tracing::debug;

use super::ShotSolver;
use crate::device::ComputeDevice;
use crate::error::Result;
use crate::grid::Grid;
use crate::modeling::Modeling;

/// Least-squares travel-time tomography.
///
/// The gradient of `0.5 * sum(r^2)` with respect to slowness is
/// `sum(r * L)`, where `L` holds the length of the receiver's ray in each
/// cell. Rays are traced from each receiver down the travel-time gradient
/// back to the source.
pub struct LeastSquares {
    modeling: Modeling,
    calculated: Vec<f64>,
}

/// Map a padded-grid position (`[y, x, z]` meters) to the nearest physical
/// cell, clamping positions in the padding onto the domain edge.
pub(crate) fn physical_cell(grid: &Grid, position: [f64; 3]) -> usize {
    let b = grid.boundary();
    let offsets = [b.yl, b.xl, b.zu];
    let spacing = grid.padded_spacing();
    let sizes = [grid.ny(), grid.nx(), grid.nz()];
    let mut idx = [0usize; 3];
    for d in 0..3 {
        let s = (position[d] / spacing[d]).round() - offsets[d] as f64;
        idx[d] = s.clamp(0.0, (sizes[d] - 1) as f64) as usize;
    }
    grid.index(idx[2], idx[1], idx[0])
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}

impl LeastSquares {
    /// Wrap a modeling engine.
    pub fn new(modeling: Modeling) -> Self {
        LeastSquares {
            modeling,
            calculated: Vec::new(),
        }
    }

    /// The wrapped modeling engine.
    pub fn modeling(&self) -> &Modeling {
        &self.modeling
    }

    /// Add `weight` times the length of the straight segment `a -> b` to
    /// `gradient`, split into pieces no longer than `step`.
    fn deposit_segment(&self, a: [f64; 3], b: [f64; 3], step: f64, weight: f64, gradient: &mut [f64]) {
        let length = distance(a, b);
        if length == 0.0 {
            return;
        }
        let pieces = (length / step).ceil().max(1.0) as usize;
        let piece = length / pieces as f64;
        for k in 0..pieces {
            let t = (k as f64 + 0.5) / pieces as f64;
            let mid = [
                a[0] + t * (b[0] - a[0]),
                a[1] + t * (b[1] - a[1]),
                a[2] + t * (b[2] - a[2]),
            ];
            gradient[physical_cell(self.modeling.grid(), mid)] += weight * piece;
        }
    }

    /// Trace the ray of `node` to the current source and deposit
    /// `residual * length` per cell.
    fn trace_ray(&self, node: usize, residual: f64, gradient: &mut [f64]) {
        let field = self.modeling.field();
        let spacing = field.spacing();
        let step = 0.5 * spacing.iter().copied().fold(f64::INFINITY, f64::min);
        let source = self.modeling.shot_position();

        let span: f64 = (0..3).map(|d| field.extent(d)).sum();
        let max_steps = (4.0 * span / step).ceil() as usize;

        let mut p = self.modeling.node_position(node);
        for _ in 0..max_steps {
            if distance(p, source) <= 2.0 * step {
                break;
            }
            let g = field.gradient(p);
            let norm = (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]).sqrt();
            if norm == 0.0 || !norm.is_finite() {
                break;
            }
            let next = [
                p[0] - step * g[0] / norm,
                p[1] - step * g[1] / norm,
                p[2] - step * g[2] / norm,
            ];
            self.deposit_segment(p, next, step, residual, gradient);
            p = next;
        }
        self.deposit_segment(p, source, step, residual, gradient);
    }
}

impl ShotSolver for LeastSquares {
    fn total_shots(&self) -> usize {
        self.modeling.geometry().total_shots()
    }

    fn data_len(&self, shot: usize) -> usize {
        self.modeling.geometry().window().len(shot)
    }

    fn prepare(&mut self, model: &[f64]) -> Result<()> {
        self.modeling.set_model(model)
    }

    fn set_shot(&mut self, shot: usize) -> Result<()> {
        self.modeling.set_shot(shot)
    }

    fn initial_conditions(&mut self) -> Result<()> {
        self.modeling.initial_conditions()
    }

    fn forward(&mut self) -> Result<()> {
        self.modeling.forward()?;
        self.calculated = self.modeling.receiver_times();
        Ok(())
    }

    fn calculated_data(&self) -> Vec<f64> {
        self.calculated.clone()
    }

    fn adjoint(&mut self, observed: &[f64], gradient: &mut [f64]) -> Result<()> {
        let window = self.modeling.geometry().window().range(self.modeling.shot());
        for (k, node) in window.enumerate() {
            let residual = self.calculated[k] - observed[k];
            if residual != 0.0 {
                self.trace_ray(node, residual, gradient);
            }
        }
        debug!(shot = self.modeling.shot(), "ray gradient accumulated");
        Ok(())
    }

    fn device(&self) -> Option<&dyn ComputeDevice> {
        Some(self.modeling.device().as_ref())
    }
}
