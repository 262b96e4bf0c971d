// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use eikonal_tomography::config::{InversionConfig, ModelingConfig, ParameterFile};
use eikonal_tomography::device::{ComputeDevice, CpuDevice};
use eikonal_tomography::geometry::Geometry;
use eikonal_tomography::grid::Grid;
use eikonal_tomography::inversion::Inversion;
use eikonal_tomography::io;
use eikonal_tomography::logging;
use eikonal_tomography::modeling::Modeling;
use eikonal_tomography::tomography::{AdjointState, InversionKind, LeastSquares, ShotSolver};

#[derive(Parser)]
#[command(
    name = "eikonal-tomography",
    about = "Iterative first-arrival travel-time tomography"
)]
struct Cli {
    /// Parameter file (`key = value` per line)
    config: PathBuf,
}

fn invert<S: ShotSolver>(
    solver: S,
    grid: Grid,
    model: Vec<f64>,
    inversion: InversionConfig,
    modeling: &ModelingConfig,
) -> Result<()> {
    let mut inv = Inversion::new(solver, grid, model, inversion)?;
    if let Some(log) = &modeling.runtime_log_file {
        inv = inv.with_runtime_log(log.clone());
    }
    inv.import_obs_data().context("failed to import observed data")?;
    inv.run()?;
    info!(
        iterations = inv.iteration(),
        residual = inv.residuals().last().copied().unwrap_or(0.0),
        "inversion done"
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing()?;

    let params = ParameterFile::from_file(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let grid = params.grid()?;
    let geometry_config = params.geometry()?;
    let modeling_config = params.modeling()?;
    let inversion_config = params.inversion()?;

    let geometry = Geometry::build(&geometry_config, &grid).context("failed to build geometry")?;
    let model = io::load_velocity_as_slowness(&modeling_config.vp_model_file, &grid)
        .with_context(|| {
            format!(
                "failed to load {}",
                modeling_config.vp_model_file.display()
            )
        })?;

    let device: Arc<dyn ComputeDevice> = Arc::new(CpuDevice::new(modeling_config.threads)?);
    let modeling = Modeling::new(grid.clone(), geometry, &modeling_config.fim, device)?;

    info!(kind = ?inversion_config.kind, "starting inversion");
    match inversion_config.kind {
        InversionKind::LeastSquares => invert(
            LeastSquares::new(modeling),
            grid,
            model,
            inversion_config,
            &modeling_config,
        ),
        InversionKind::AdjointState => invert(
            AdjointState::new(modeling),
            grid,
            model,
            inversion_config,
            &modeling_config,
        ),
    }
}
