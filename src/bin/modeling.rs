// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use eikonal_tomography::config::ParameterFile;
use eikonal_tomography::device::{ComputeDevice, CpuDevice};
use eikonal_tomography::geometry::Geometry;
use eikonal_tomography::io;
use eikonal_tomography::logging;
use eikonal_tomography::modeling::Modeling;

#[derive(Parser)]
#[command(
    name = "eikonal-modeling",
    about = "First-arrival travel-time modeling for every shot"
)]
struct Cli {
    /// Parameter file (`key = value` per line)
    config: PathBuf,
}

fn main() -> Result<()> {
    let started = Instant::now();
    let cli = Cli::parse();
    logging::init_tracing()?;

    let params = ParameterFile::from_file(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let grid = params.grid()?;
    let geometry_config = params.geometry()?;
    let config = params.modeling()?;

    let geometry = Geometry::build(&geometry_config, &grid).context("failed to build geometry")?;
    let model = io::load_velocity_as_slowness(&config.vp_model_file, &grid)
        .with_context(|| format!("failed to load {}", config.vp_model_file.display()))?;

    let device: Arc<dyn ComputeDevice> = Arc::new(CpuDevice::new(config.threads)?);
    let mut modeling = Modeling::new(grid, geometry, &config.fim, Arc::clone(&device))?;
    modeling.set_model(&model)?;
    modeling.run(&config)?;

    let elapsed = started.elapsed();
    let ram_mb = io::peak_ram_mb();
    let device_mb = device.memory_usage_mb();
    info!(
        seconds = elapsed.as_secs_f64(),
        ram_mb,
        device_mb,
        "modeling finished"
    );
    if let Some(log) = &config.runtime_log_file {
        io::append_runtime_log(log, elapsed, ram_mb, device_mb)?;
    }
    Ok(())
}
