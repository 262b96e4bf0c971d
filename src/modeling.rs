// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Per-shot eikonal forward modeling on the padded grid.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ModelingConfig;
use crate::device::{ComputeDevice, DeviceBuffer};
use crate::eikonal::{FimConfig, FimSolver, SolveStats, TravelTimeField};
use crate::error::{Result, TomographyError};
use crate::geometry::Geometry;
use crate::grid::Grid;
use crate::io;

/// Forward modeling engine: one slowness model, one shot at a time.
pub struct Modeling {
    grid: Grid,
    geometry: Geometry,
    device: Arc<dyn ComputeDevice>,
    solver: FimSolver,
    slowness: DeviceBuffer,
    travel_time: DeviceBuffer,
    shot: usize,
}

impl Modeling {
    /// Validate the geometry against the grid and allocate device buffers.
    pub fn new(
        grid: Grid,
        geometry: Geometry,
        fim: &FimConfig,
        device: Arc<dyn ComputeDevice>,
    ) -> Result<Self> {
        grid.check_geometry(&geometry)?;
        let field = TravelTimeField::new(
            grid.padded_shape(),
            grid.padded_spacing(),
            vec![1.0; grid.volsize()],
        )?;
        let solver = FimSolver::new(field, fim.clone())?;
        let slowness = device.allocate(grid.volsize());
        let travel_time = device.allocate(grid.volsize());
        debug!(
            device = device.name(),
            volsize = grid.volsize(),
            "modeling buffers allocated"
        );
        Ok(Modeling {
            grid,
            geometry,
            device,
            solver,
            slowness,
            travel_time,
            shot: 0,
        })
    }

    /// Physical and padded grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Acquisition geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Device the solver runs on.
    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }

    /// The solver's travel-time field.
    pub fn field(&self) -> &TravelTimeField {
        self.solver.field()
    }

    /// Index of the current shot.
    pub fn shot(&self) -> usize {
        self.shot
    }

    /// Load a physical slowness model: expand into the padded layout and
    /// copy to the device.
    pub fn set_model(&mut self, model: &[f64]) -> Result<()> {
        let mut padded = vec![0.0; self.grid.volsize()];
        self.grid.expand(model, &mut padded)?;
        self.device.copy_in(&mut self.slowness, &padded)?;
        self.solver.set_slowness(self.slowness.as_slice())
    }

    /// Select the shot used by the next forward solve.
    pub fn set_shot(&mut self, shot: usize) -> Result<()> {
        if shot >= self.geometry.total_shots() {
            return Err(TomographyError::InvalidParameter {
                key: "shot".to_string(),
                reason: format!(
                    "{} out of range for {} shots",
                    shot,
                    self.geometry.total_shots()
                ),
            });
        }
        self.shot = shot;
        Ok(())
    }

    /// Padded-grid position of node `node`, ordered `[y, x, z]`.
    pub fn node_position(&self, node: usize) -> [f64; 3] {
        let [x, y, z] = self.geometry.nodes().point(node);
        self.grid.padded_position(x, y, z)
    }

    /// Padded-grid position of the current shot, ordered `[y, x, z]`.
    pub fn shot_position(&self) -> [f64; 3] {
        let [x, y, z] = self.geometry.shots().point(self.shot);
        self.grid.padded_position(x, y, z)
    }

    /// Reset travel times and seed the current shot.
    pub fn initial_conditions(&mut self) -> Result<()> {
        self.solver.reset();
        let source = self.shot_position();
        self.solver.add_source(source)
    }

    /// Solve for the current shot on the device.
    pub fn forward(&mut self) -> Result<SolveStats> {
        let solver = &self.solver;
        let buffer = &mut self.travel_time;
        let mut result = Ok(SolveStats::default());
        self.device.run(&mut || {
            result = solver.solve();
            if result.is_ok() {
                buffer.as_mut_slice().copy_from_slice(&solver.field().travel_times());
            }
        });
        self.device.synchronize();
        let stats = result?;
        debug!(shot = self.shot, rounds = stats.rounds, "forward solve done");
        Ok(stats)
    }

    /// Travel times at the current shot's receivers, in window order.
    pub fn receiver_times(&self) -> Vec<f64> {
        let field = self.solver.field();
        self.geometry
            .window()
            .range(self.shot)
            .map(|node| field.interpolate(self.node_position(node)))
            .collect()
    }

    /// Travel-time volume of the last solve in the physical layout.
    pub fn travel_time_volume(&self) -> Result<Vec<f64>> {
        let mut padded = vec![0.0; self.grid.volsize()];
        self.device.copy_out(&self.travel_time, &mut padded)?;
        let mut physical = vec![0.0; self.grid.n_points()];
        self.grid.reduce(&padded, &mut physical)?;
        Ok(physical)
    }

    /// Model every shot and write the outputs selected in `config`.
    pub fn run(&mut self, config: &ModelingConfig) -> Result<()> {
        let total = self.geometry.total_shots();
        for shot in 0..total {
            self.set_shot(shot)?;
            self.initial_conditions()?;
            self.forward()?;
            info!(shot = shot + 1, total, "shot modeled");

            if config.export_receiver_output {
                let path = config
                    .receiver_output_folder
                    .join(format!("{}{}.bin", config.receiver_output_prefix, shot + 1));
                io::write_binary_f32(&path, &self.receiver_times())?;
            }
            if config.export_wavefield_output {
                let name = io::volume_file_name(
                    &format!("travel_time_volume_shot_{}", shot + 1),
                    &self.grid,
                );
                let path = config.wavefield_output_folder.join(name);
                io::write_binary_f32(&path, &self.travel_time_volume()?)?;
            }
        }
        Ok(())
    }
}

impl Drop for Modeling {
    fn drop(&mut self) {
        self.device.release(std::mem::take(&mut self.slowness));
        self.device.release(std::mem::take(&mut self.travel_time));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use crate::geometry::CoordinateSet;
    use crate::grid::Boundary;

    fn modeling(boundary: usize) -> Modeling {
        let grid = Grid::new([21, 11, 11], [10.0, 10.0, 10.0])
            .unwrap()
            .with_boundary(Boundary::uniform(boundary));
        let shots = CoordinateSet::from_points(&[[0.0, 50.0, 0.0], [200.0, 50.0, 0.0]]);
        let nodes = CoordinateSet::from_points(&[
            [50.0, 50.0, 0.0],
            [100.0, 50.0, 0.0],
            [150.0, 50.0, 0.0],
            [100.0, 50.0, 100.0],
        ]);
        let device: Arc<dyn ComputeDevice> = Arc::new(CpuDevice::new(Some(2)).unwrap());
        Modeling::new(grid, Geometry::new(shots, nodes), &FimConfig::default(), device).unwrap()
    }

    #[test]
    fn homogeneous_receiver_times() {
        let mut m = modeling(2);
        let slowness = vec![1.0 / 2000.0; m.grid().n_points()];
        m.set_model(&slowness).unwrap();
        m.set_shot(0).unwrap();
        m.initial_conditions().unwrap();
        m.forward().unwrap();

        let times = m.receiver_times();
        assert_eq!(times.len(), 4);
        // Straight inline offsets are exact.
        assert!((times[0] - 50.0 / 2000.0).abs() < 1e-9);
        assert!((times[1] - 100.0 / 2000.0).abs() < 1e-9);
        assert!((times[2] - 150.0 / 2000.0).abs() < 1e-9);
        let diagonal = (100.0_f64 * 100.0 + 100.0 * 100.0).sqrt() / 2000.0;
        assert!((times[3] - diagonal).abs() < 0.1 * diagonal);
    }

    #[test]
    fn travel_time_volume_is_physical() {
        let mut m = modeling(3);
        m.set_model(&vec![1.0 / 1500.0; m.grid().n_points()]).unwrap();
        m.set_shot(1).unwrap();
        m.initial_conditions().unwrap();
        m.forward().unwrap();

        let volume = m.travel_time_volume().unwrap();
        assert_eq!(volume.len(), m.grid().n_points());
        let at_source = volume[m.grid().index(0, 20, 5)];
        assert!(at_source.abs() < 1e-12);
        assert!(volume.iter().all(|t| t.is_finite() && *t >= 0.0));
    }

    #[test]
    fn device_memory_released_on_drop() {
        let device: Arc<dyn ComputeDevice> = Arc::new(CpuDevice::new(Some(1)).unwrap());
        let grid = Grid::new([64, 64, 64], [1.0; 3]).unwrap();
        let shots = CoordinateSet::from_points(&[[1.0, 1.0, 1.0]]);
        let m = Modeling::new(
            grid,
            Geometry::new(shots.clone(), shots),
            &FimConfig::default(),
            Arc::clone(&device),
        )
        .unwrap();
        assert_eq!(device.memory_usage_mb(), 4);
        drop(m);
        assert_eq!(device.memory_usage_mb(), 0);
    }

    #[test]
    fn rejects_out_of_domain_geometry() {
        let grid = Grid::new([11, 11, 11], [10.0; 3]).unwrap();
        let shots = CoordinateSet::from_points(&[[50.0, 50.0, 120.0]]);
        let nodes = CoordinateSet::from_points(&[[0.0, 0.0, 0.0]]);
        let device: Arc<dyn ComputeDevice> = Arc::new(CpuDevice::new(Some(1)).unwrap());
        let result = Modeling::new(
            grid,
            Geometry::new(shots, nodes),
            &FimConfig::default(),
            device,
        );
        assert!(matches!(
            result,
            Err(TomographyError::GeometryOverflow { .. })
        ));
    }

    #[test]
    fn shot_index_checked() {
        let mut m = modeling(0);
        assert!(m.set_shot(2).is_err());
    }
}
