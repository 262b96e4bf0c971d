// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! First-arrival travel times on the padded grid.

/// Atomic travel-time storage and tiling.
pub mod field;
/// Tiled parallel solver.
pub mod fim;
/// Local Godunov update.
pub mod kernels;

pub use field::TravelTimeField;
pub use fim::{FimConfig, FimSolver, SolveStats};
