// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eikonal_tomography::config::{InversionConfig, ModelingConfig, ParameterFile};
use eikonal_tomography::device::{ComputeDevice, CpuDevice};
use eikonal_tomography::eikonal::{FimConfig, FimSolver, TravelTimeField};
use eikonal_tomography::error::Result;
use eikonal_tomography::geometry::{CoordinateSet, Geometry};
use eikonal_tomography::grid::{Boundary, Grid};
use eikonal_tomography::inversion::{steepest_descent_step, Inversion, Phase};
use eikonal_tomography::io;
use eikonal_tomography::modeling::Modeling;
use eikonal_tomography::smoothing::GaussianSmoother;
use eikonal_tomography::tomography::{
    AdjointState, InversionKind, LeastSquares, ShotSolver, SlownessBounds,
};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("eikonal_tomography_it_{}", name));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn solve_point_source(
    shape: [usize; 3],
    spacing: [f64; 3],
    slowness: Vec<f64>,
    source: [f64; 3],
) -> FimSolver {
    let field = TravelTimeField::new(shape, spacing, slowness).unwrap();
    let config = FimConfig {
        tolerance: 1e-10,
        ..FimConfig::default()
    };
    let mut solver = FimSolver::new(field, config).unwrap();
    solver.add_source(source).unwrap();
    solver.solve().unwrap();
    solver
}

/// Point source (homogeneous) in 3D.
/// Fixed physical domain at two resolutions; the L∞ error away from the
/// source must shrink roughly linearly with h.
#[test]
fn point_source_homogeneous_3d_convergence() {
    let domain_size = 32.0;

    let run = |n: usize| -> f64 {
        let h = domain_size / (n - 1) as f64;
        let center = domain_size / 2.0;
        let solver = solve_point_source(
            [n, n, n],
            [h; 3],
            vec![1.0; n * n * n],
            [center, center, center],
        );

        let mut max_err = 0.0_f64;
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let u = solver.field().get_u([i, j, k]);
                    let dist = [i, j, k]
                        .iter()
                        .map(|&v| (v as f64 * h - center).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    if dist > 3.0 * h {
                        max_err = max_err.max((u - dist).abs());
                    }
                }
            }
        }
        max_err
    };

    let err_33 = run(33);
    let err_65 = run(65);

    let ratio = err_33 / err_65;
    assert!(
        ratio > 1.2 && ratio < 3.0,
        "3D convergence ratio = {} (expected ~2.0, errors: 33^3={}, 65^3={})",
        ratio,
        err_33,
        err_65
    );
}

/// Different spacing on every axis over an isotropic medium.
#[test]
fn anisotropic_spacing_homogeneous() {
    let shape = [17, 33, 65];
    let spacing = [2.0, 1.0, 0.5];
    let n: usize = shape.iter().product();
    let source = [16.0, 16.0, 16.0];
    let solver = solve_point_source(shape, spacing, vec![1.0; n], source);

    // Straight lines through the source along each axis.
    let field = solver.field();
    assert!((field.get_u([8, 16, 0]) - 16.0).abs() < 0.1);
    assert!((field.get_u([8, 0, 32]) - 16.0).abs() < 0.1);
    assert!((field.get_u([0, 16, 32]) - 16.0).abs() < 0.1);

    let mut max_err = 0.0_f64;
    for y in 0..shape[0] {
        for x in 0..shape[1] {
            for z in 0..shape[2] {
                let p = [y as f64 * 2.0, x as f64, z as f64 * 0.5];
                let dist = p
                    .iter()
                    .zip(source.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                let u = field.get_u([y, x, z]);
                assert!(u.is_finite() && u >= 0.0);
                if dist > 6.0 {
                    max_err = max_err.max((u - dist).abs());
                }
            }
        }
    }
    assert!(max_err < 6.0, "anisotropic max error = {}", max_err);
}

/// Linear velocity gradient with depth.
/// v(z) = v0 + g*z; analytical travel time via the arccosh formula.
#[test]
fn linear_velocity_gradient_3d() {
    let n = 41;
    let h = 1.0;
    let v0 = 1.0;
    let g = 0.5;

    let mut slowness = vec![0.0; n * n * n];
    for y in 0..n {
        for x in 0..n {
            for z in 0..n {
                slowness[(y * n + x) * n + z] = 1.0 / (v0 + g * z as f64 * h);
            }
        }
    }

    let c = (n / 2) as f64 * h;
    let solver = solve_point_source([n, n, n], [h; 3], slowness, [c, c, c]);
    let vs = v0 + g * c;

    let mut max_err = 0.0_f64;
    let mut test_points = 0;
    for y in (0..n).step_by(5) {
        for x in (0..n).step_by(5) {
            for z in (0..n).step_by(5) {
                let d = [y as f64 * h - c, x as f64 * h - c, z as f64 * h - c];
                let r_sq: f64 = d.iter().map(|v| v * v).sum();
                if r_sq.sqrt() < 8.0 * h {
                    continue;
                }
                let vr = v0 + g * z as f64 * h;
                let analytical = (1.0 + g * g * r_sq / (2.0 * vs * vr)).acosh() / g;
                let u = solver.field().get_u([y, x, z]);
                max_err = max_err.max((u - analytical).abs());
                test_points += 1;
            }
        }
    }

    assert!(test_points > 10, "not enough test points: {}", test_points);
    assert!(
        max_err < 5.0 * h,
        "linear gradient max error = {} (expected O(h)=O({}))",
        max_err,
        h
    );
}

/// Alternating slowness blocks: the solver terminates with finite,
/// non-negative times everywhere.
#[test]
fn checkerboard_slowness_3d() {
    let n = 32;
    let block_size = 4;

    let mut slowness = vec![0.0; n * n * n];
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let parity = (i / block_size + j / block_size + k / block_size) % 2;
                slowness[(i * n + j) * n + k] = if parity == 0 { 1.0 } else { 2.0 };
            }
        }
    }

    let solver = solve_point_source([n, n, n], [1.0; 3], slowness, [16.0, 16.0, 16.0]);
    for (i, u) in solver.field().travel_times().iter().enumerate() {
        assert!(*u >= 0.0 && u.is_finite(), "bad travel time at {}: {}", i, u);
    }
}

#[test]
fn expand_then_reduce_restores_physical_model() {
    let grid = Grid::new([7, 4, 5], [10.0; 3])
        .unwrap()
        .with_boundary(Boundary {
            xl: 2,
            xr: 1,
            yl: 0,
            yr: 3,
            zu: 1,
            zd: 2,
        });
    let physical: Vec<f64> = (0..grid.n_points()).map(|i| i as f64).collect();
    let mut padded = vec![0.0; grid.volsize()];
    grid.expand(&physical, &mut padded).unwrap();

    // Corners replicate the nearest physical corner.
    assert_eq!(padded[grid.padded_index(0, 0, 0)], physical[grid.index(0, 0, 0)]);
    let (nzz, nxx, nyy) = (grid.nzz(), grid.nxx(), grid.nyy());
    assert_eq!(
        padded[grid.padded_index(nzz - 1, nxx - 1, nyy - 1)],
        physical[grid.index(4, 6, 3)]
    );

    let mut restored = vec![0.0; grid.n_points()];
    grid.reduce(&padded, &mut restored).unwrap();
    assert_eq!(restored, physical);
}

#[test]
fn circular_geometry_from_parameter_file() {
    let dir = scratch("circular");
    let text = format!(
        "
        geometry_type = 1
        shots_file = {shots}
        nodes_file = {nodes}
        spacing = 50
        center = 0, 150, 150
        offsets = 100
        nodes_nlines = 2, 2
        nodes_SW = 100, 100, 0
        nodes_NW = 100, 200, 0
        nodes_SE = 200, 100, 0
        ",
        shots = dir.join("shots.txt").display(),
        nodes = dir.join("nodes.txt").display(),
    );
    let params = ParameterFile::parse(&text).unwrap();
    let config = params.geometry().unwrap();
    let grid = Grid::new([31, 31, 5], [10.0; 3]).unwrap();
    let geometry = Geometry::build(&config, &grid).unwrap();

    assert_eq!(geometry.total_shots(), 13);
    assert_eq!(geometry.total_nodes(), 4);
    for shot in 0..13 {
        assert_eq!(geometry.window().range(shot), 0..4);
    }

    // Synthesized coordinates were exported and read back unchanged.
    let shots = io::read_coordinates(&config.shots_file).unwrap();
    assert_eq!(shots.total(), 13);
    for (a, b) in shots.points().zip(geometry.shots().points()) {
        for d in 0..3 {
            assert!((a[d] - b[d]).abs() < 1e-6);
        }
    }
}

#[test]
fn capped_step_matches_hand_computation() {
    let mut variation = vec![0.0; 3];
    assert!(steepest_descent_step(&[1.0, -2.0, 3.0], 7.0, 0.5, &mut variation));
    let expected = [1.0 / 6.0, -1.0 / 3.0, 0.5];
    for (v, e) in variation.iter().zip(expected) {
        assert!((v - e).abs() < 1e-12, "{} != {}", v, e);
    }
}

#[test]
fn zero_stdv_smoothing_is_identity() {
    let smoother = GaussianSmoother::new(5, 0.0).unwrap();
    let grid = Grid::new([6, 4, 5], [1.0; 3])
        .unwrap()
        .with_boundary(Boundary::uniform(smoother.radius()));
    let physical: Vec<f64> = (0..grid.n_points()).map(|i| (i as f64).cos()).collect();
    let mut padded = vec![0.0; grid.volsize()];
    grid.expand(&physical, &mut padded).unwrap();
    let mut smoothed = vec![0.0; padded.len()];
    smoother
        .smooth(&padded, &mut smoothed, grid.padded_shape())
        .unwrap();
    let mut restored = vec![0.0; grid.n_points()];
    grid.reduce(&smoothed, &mut restored).unwrap();
    assert_eq!(restored, physical);
}

/// Calculated data is the model mean at every receiver; the gradient is the
/// summed residual on every cell.
#[derive(Default)]
struct MeanPort {
    mean: f64,
    forwards: usize,
    adjoints: usize,
}

impl ShotSolver for MeanPort {
    fn total_shots(&self) -> usize {
        2
    }
    fn data_len(&self, _shot: usize) -> usize {
        3
    }
    fn prepare(&mut self, model: &[f64]) -> Result<()> {
        self.mean = model.iter().sum::<f64>() / model.len() as f64;
        Ok(())
    }
    fn set_shot(&mut self, _shot: usize) -> Result<()> {
        Ok(())
    }
    fn initial_conditions(&mut self) -> Result<()> {
        Ok(())
    }
    fn forward(&mut self) -> Result<()> {
        self.forwards += 1;
        Ok(())
    }
    fn calculated_data(&self) -> Vec<f64> {
        vec![self.mean; 3]
    }
    fn adjoint(&mut self, observed: &[f64], gradient: &mut [f64]) -> Result<()> {
        self.adjoints += 1;
        let r: f64 = observed.iter().map(|o| self.mean - o).sum();
        gradient.iter_mut().for_each(|g| *g += r);
        Ok(())
    }
}

fn inversion_config(dir: &Path, max_iteration: usize, max_variation: f64) -> InversionConfig {
    InversionConfig {
        kind: InversionKind::LeastSquares,
        max_iteration,
        max_slowness_variation: max_variation,
        obs_data_folder: dir.to_path_buf(),
        obs_data_prefix: "observed_shot_".to_string(),
        smoothing: None,
        convergence_folder: dir.to_path_buf(),
        estimated_model_folder: dir.to_path_buf(),
        export_model_per_iteration: true,
        bounds: None,
    }
}

#[test]
fn mock_port_runs_to_max_iteration() {
    let dir = scratch("mock");
    let grid = Grid::new([2, 2, 2], [1.0; 3]).unwrap();
    let config = inversion_config(&dir, 2, 0.1);
    let mut inv = Inversion::new(MeanPort::default(), grid.clone(), vec![1.0; 8], config).unwrap();
    inv.set_observed_data(vec![vec![0.5; 3]; 2]).unwrap();
    inv.run().unwrap();

    assert_eq!(inv.phase(), Phase::Converged);
    assert_eq!(inv.iteration(), 2);
    assert_eq!(inv.residuals().len(), 3);
    assert!(inv.residuals().windows(2).all(|w| w[1] < w[0]));
    assert_eq!(inv.solver().forwards, 6);
    assert_eq!(inv.solver().adjoints, 4);

    let curve = std::fs::read_to_string(dir.join("convergence_2_iterations.txt")).unwrap();
    assert_eq!(curve.lines().count(), 3);
    let final_model = io::read_binary_f32(
        &dir.join(io::volume_file_name("final_model", &grid)),
        grid.n_points(),
    )
    .unwrap();
    // Exported as velocity.
    for (v, s) in final_model.iter().zip(inv.model()) {
        assert!((v - 1.0 / s).abs() < 1e-4 * v);
    }
    for it in 1..=2 {
        let name = io::volume_file_name(&format!("model_iteration_{}", it), &grid);
        assert!(dir.join(name).exists());
    }
}

fn survey_grid() -> Grid {
    Grid::new([21, 5, 11], [10.0; 3])
        .unwrap()
        .with_boundary(Boundary::uniform(2))
}

fn survey_geometry() -> Geometry {
    let shots = CoordinateSet::from_points(&[[0.0, 20.0, 10.0], [200.0, 20.0, 10.0]]);
    let nodes = CoordinateSet::from_points(&[
        [50.0, 20.0, 90.0],
        [75.0, 20.0, 90.0],
        [100.0, 20.0, 90.0],
        [125.0, 20.0, 90.0],
        [150.0, 20.0, 90.0],
    ]);
    Geometry::new(shots, nodes)
}

fn survey_modeling() -> Modeling {
    let device: Arc<dyn ComputeDevice> = Arc::new(CpuDevice::new(Some(2)).unwrap());
    Modeling::new(
        survey_grid(),
        survey_geometry(),
        &FimConfig::default(),
        device,
    )
    .unwrap()
}

/// Model a true medium with the forward engine and write its receiver
/// times as observed data.
fn write_observed(dir: &Path, velocity: f64) {
    let mut modeling = survey_modeling();
    let n = modeling.grid().n_points();
    modeling.set_model(&vec![1.0 / velocity; n]).unwrap();
    let config = ModelingConfig {
        vp_model_file: dir.join("unused.bin"),
        fim: FimConfig::default(),
        threads: Some(2),
        export_receiver_output: true,
        receiver_output_folder: dir.to_path_buf(),
        receiver_output_prefix: "observed_shot_".to_string(),
        export_wavefield_output: false,
        wavefield_output_folder: dir.to_path_buf(),
        runtime_log_file: None,
    };
    modeling.run(&config).unwrap();
}

#[test]
fn least_squares_inversion_reduces_residual() {
    let dir = scratch("least_squares");
    write_observed(&dir, 2000.0);

    let grid = survey_grid();
    let initial = vec![1.0 / 2500.0; grid.n_points()];
    let mut config = inversion_config(&dir, 3, 2e-5);
    config.export_model_per_iteration = false;
    let mut inv = Inversion::new(
        LeastSquares::new(survey_modeling()),
        grid,
        initial.clone(),
        config,
    )
    .unwrap()
    .with_runtime_log(dir.join("runtime.log"));
    inv.import_obs_data().unwrap();
    inv.run().unwrap();

    let residuals = inv.residuals();
    assert_eq!(residuals.len(), 4);
    assert!(
        residuals[3] < residuals[0],
        "residual did not decrease: {:?}",
        residuals
    );
    // Too fast a start: every cell slows down or stays.
    for (m, s0) in inv.model().iter().zip(&initial) {
        assert!(*m >= s0 - 1e-12);
    }
    let log = std::fs::read_to_string(dir.join("runtime.log")).unwrap();
    assert!(log.contains("Run time:"));
}

#[test]
fn adjoint_state_step_slows_a_fast_model() {
    let dir = scratch("adjoint_state");
    write_observed(&dir, 2000.0);

    let grid = survey_grid();
    let initial = vec![1.0 / 2500.0; grid.n_points()];
    let mut config = inversion_config(&dir, 1, 2e-5);
    config.kind = InversionKind::AdjointState;
    config.export_model_per_iteration = false;
    config.bounds = Some(SlownessBounds::from_velocities(Some(1500.0), Some(3000.0)).unwrap());
    let mut inv = Inversion::new(
        AdjointState::new(survey_modeling()),
        grid,
        initial.clone(),
        config,
    )
    .unwrap();
    inv.import_obs_data().unwrap();
    inv.run().unwrap();

    assert_eq!(inv.residuals().len(), 2);
    let mut moved = 0;
    for (m, s0) in inv.model().iter().zip(&initial) {
        assert!(*m >= s0 - 1e-12);
        assert!(*m <= 1.0 / 1500.0);
        if *m > *s0 {
            moved += 1;
        }
    }
    assert!(moved > 0);
}

#[test]
fn observed_data_length_checked_on_import() {
    let dir = scratch("short_observed");
    io::write_binary_f32(&dir.join("observed_shot_1.bin"), &[0.1, 0.2]).unwrap();
    io::write_binary_f32(&dir.join("observed_shot_2.bin"), &[0.1; 5]).unwrap();

    let grid = survey_grid();
    let n = grid.n_points();
    let mut inv = Inversion::new(
        LeastSquares::new(survey_modeling()),
        grid,
        vec![1.0 / 2000.0; n],
        inversion_config(&dir, 1, 1e-5),
    )
    .unwrap();
    assert!(inv.import_obs_data().is_err());
}
