// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use tracing::debug;

use super::ShotSolver;
use crate::device::{ComputeDevice, DeviceBuffer};
use crate::error::Result;
use crate::modeling::Modeling;

/// Adjoint-state travel-time tomography.
///
/// Solves the transport equation `div(lambda * grad T) = 0` for the adjoint
/// variable by upwind fast sweeping on the padded grid, with `lambda` held
/// at each receiver's cell to the residual `T_calc - T_obs`. The shot's
/// gradient contribution is `lambda * s` on the physical cells.
pub struct AdjointState {
    modeling: Modeling,
    calculated: Vec<f64>,
    lambda: DeviceBuffer,
    max_sweeps: usize,
    tolerance: f64,
}

impl AdjointState {
    /// Wrap a modeling engine and allocate the adjoint buffer on its device.
    pub fn new(modeling: Modeling) -> Self {
        let lambda = modeling.device().allocate(modeling.grid().volsize());
        AdjointState {
            modeling,
            calculated: Vec::new(),
            lambda,
            max_sweeps: 10,
            tolerance: 1e-6,
        }
    }

    /// Set the number of 8-direction sweep cycles (builder method). Default 10.
    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    /// The wrapped modeling engine.
    pub fn modeling(&self) -> &Modeling {
        &self.modeling
    }

    /// Adjoint variable of the last [`ShotSolver::adjoint`] call, padded layout.
    pub fn lambda(&self) -> &[f64] {
        self.lambda.as_slice()
    }

    fn nearest_cell(&self, position: [f64; 3]) -> usize {
        let field = self.modeling.field();
        let shape = field.shape();
        let spacing = field.spacing();
        let mut idx = [0usize; 3];
        for d in 0..3 {
            idx[d] = ((position[d] / spacing[d]).round().max(0.0) as usize).min(shape[d] - 1);
        }
        idx[0] * shape[1] * shape[2] + idx[1] * shape[2] + idx[2]
    }
}

/// Upwind fast sweeping for the adjoint variable.
///
/// `fixed` cells keep their value. Returns the number of sweep cycles run.
fn sweep_adjoint(
    lambda: &mut [f64],
    fixed: &[bool],
    travel_time: &[f64],
    shape: [usize; 3],
    spacing: [f64; 3],
    max_sweeps: usize,
    tolerance: f64,
) -> usize {
    let strides = [shape[1] * shape[2], shape[2], 1];
    let scale = lambda.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return 0;
    }

    for cycle in 0..max_sweeps {
        let mut max_change: f64 = 0.0;
        for dir in 0..8 {
            let order = |d: usize| -> Vec<usize> {
                if dir & (1 << d) != 0 {
                    (0..shape[d]).rev().collect()
                } else {
                    (0..shape[d]).collect()
                }
            };
            let (ys, xs, zs) = (order(0), order(1), order(2));
            for &y in &ys {
                for &x in &xs {
                    for &z in &zs {
                        let idx = [y, x, z];
                        let i = y * strides[0] + x * strides[1] + z;
                        if fixed[i] {
                            continue;
                        }
                        let t = travel_time[i];
                        let mut num = 0.0;
                        let mut den = 0.0;
                        for d in 0..3 {
                            let h = spacing[d];
                            if idx[d] > 0 {
                                let lo = i - strides[d];
                                let a = -(t - travel_time[lo]) / h;
                                num += a.max(0.0) * lambda[lo] / h;
                                den -= a.min(0.0) / h;
                            }
                            if idx[d] + 1 < shape[d] {
                                let hi = i + strides[d];
                                let a = -(travel_time[hi] - t) / h;
                                num -= a.min(0.0) * lambda[hi] / h;
                                den += a.max(0.0) / h;
                            }
                        }
                        if den > f64::EPSILON {
                            let value = num / den;
                            max_change = max_change.max((value - lambda[i]).abs());
                            lambda[i] = value;
                        }
                    }
                }
            }
        }
        if max_change <= tolerance * scale {
            return cycle + 1;
        }
    }
    max_sweeps
}

impl ShotSolver for AdjointState {
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
        let field = self.modeling.field();
        let shape = field.shape();
        let spacing = field.spacing();
        let travel_time = field.travel_times();
        let volsize = travel_time.len();

        let mut lambda = vec![0.0; volsize];
        let mut fixed = vec![false; volsize];
        let window = self.modeling.geometry().window().range(self.modeling.shot());
        for (k, node) in window.enumerate() {
            let cell = self.nearest_cell(self.modeling.node_position(node));
            lambda[cell] += self.calculated[k] - observed[k];
            fixed[cell] = true;
        }

        let (max_sweeps, tolerance) = (self.max_sweeps, self.tolerance);
        let mut cycles = 0;
        self.modeling.device().run(&mut || {
            cycles = sweep_adjoint(
                &mut lambda,
                &fixed,
                &travel_time,
                shape,
                spacing,
                max_sweeps,
                tolerance,
            );
        });
        self.modeling.device().synchronize();
        self.modeling.device().copy_in(&mut self.lambda, &lambda)?;

        let grid = self.modeling.grid();
        let slowness = self.modeling.field().slowness();
        for y in 0..grid.ny() {
            for x in 0..grid.nx() {
                for z in 0..grid.nz() {
                    let p = grid.interior_index(z, x, y);
                    gradient[grid.index(z, x, y)] += lambda[p] * slowness[p];
                }
            }
        }
        debug!(shot = self.modeling.shot(), cycles, "adjoint state accumulated");
        Ok(())
    }

    fn device(&self) -> Option<&dyn ComputeDevice> {
        Some(self.modeling.device().as_ref())
    }
}

impl Drop for AdjointState {
    fn drop(&mut self) {
        let lambda = std::mem::take(&mut self.lambda);
        self.modeling.device().release(lambda);
    }
}
