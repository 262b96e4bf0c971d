// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Iterative first-arrival travel-time tomography on 3D Cartesian grids.
//!
//! Shots are modeled one at a time by solving the eikonal equation
//! |∇T| = s on a padded grid with the Fast Iterative Method. An inversion
//! loop compares calculated receiver times against observed ones,
//! accumulates a slowness gradient over all shots, and applies a capped,
//! optionally Gaussian-smoothed, steepest-descent step until the iteration
//! limit is reached.

#![warn(missing_docs)]

/// Parameter files and typed configuration sections.
pub mod config;
/// Compute device abstraction and the CPU implementation.
pub mod device;
/// Fast Iterative Method eikonal solver.
pub mod eikonal;
/// Error types for the library.
pub mod error;
/// Shot/receiver coordinates and the shot-to-receiver window.
pub mod geometry;
/// Physical and padded grid layouts.
pub mod grid;
/// Inversion control loop.
pub mod inversion;
/// Binary and text file I/O.
pub mod io;
/// Tracing subscriber setup for the binaries.
pub mod logging;
/// Per-shot forward modeling.
pub mod modeling;
/// Gaussian smoothing of model updates.
pub mod smoothing;
/// Gradient formulations behind the per-shot solver port.
pub mod tomography;

pub use crate::device::{ComputeDevice, CpuDevice};
pub use crate::error::{Result, TomographyError};
pub use crate::geometry::Geometry;
pub use crate::grid::Grid;
pub use crate::inversion::{Inversion, Phase};
pub use crate::modeling::Modeling;
pub use crate::tomography::{AdjointState, InversionKind, LeastSquares, ShotSolver};
