// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;

use crate::geometry::Role;
use crate::grid::Axis;

/// Errors that can occur during configuration, geometry setup, I/O, or inversion.
#[derive(Debug, thiserror::Error)]
pub enum TomographyError {
    /// A required configuration key is absent.
    #[error("missing parameter '{key}'")]
    MissingParameter {
        /// The configuration key.
        key: String,
    },
    /// A configuration value could not be parsed into the expected type.
    #[error("invalid value '{value}' for parameter '{key}': {reason}")]
    Parse {
        /// The configuration key.
        key: String,
        /// The raw value found in the file.
        value: String,
        /// Explanation of the failure.
        reason: String,
    },
    /// A configuration value parsed but is outside its valid range.
    #[error("invalid parameter '{key}': {reason}")]
    InvalidParameter {
        /// The configuration key.
        key: String,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// A geometry or data text file contains a malformed line.
    #[error("malformed line {line} in {}: {reason}", path.display())]
    MalformedFile {
        /// The offending file.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// Explanation of the failure.
        reason: String,
    },
    /// A shot or node lies outside the physical domain on at least one axis.
    #[error("{role} geometry overflow: {role} {index} has {axis} = {value} outside [0, {max}]")]
    GeometryOverflow {
        /// Whether the point is a shot or a node.
        role: Role,
        /// Index of the point in its coordinate set.
        index: usize,
        /// The first axis found out of bounds.
        axis: Axis,
        /// The offending coordinate.
        value: f64,
        /// Upper bound of the domain on that axis.
        max: f64,
    },
    /// A relational window entry violates 0 <= begin <= end <= total_nodes.
    #[error("invalid relational window for shot {shot}: [{begin}, {end}) with {total_nodes} nodes")]
    InvalidRelationalWindow {
        /// The shot index.
        shot: usize,
        /// Window start.
        begin: usize,
        /// Window end (exclusive).
        end: usize,
        /// Number of nodes in the geometry.
        total_nodes: usize,
    },
    /// Grid shape is invalid (dimension too small).
    #[error("invalid grid shape: axis {axis} has size {size} (must be >= 2)")]
    InvalidGridShape {
        /// The axis.
        axis: Axis,
        /// The size provided.
        size: usize,
    },
    /// Grid spacing is not positive and finite.
    #[error("invalid grid spacing on axis {axis}: {value} (must be positive and finite)")]
    InvalidGridSpacing {
        /// The axis.
        axis: Axis,
        /// The spacing provided.
        value: f64,
    },
    /// Slowness value is not positive and finite.
    #[error("invalid slowness at index {index}: {value} (must be positive and finite)")]
    InvalidSlowness {
        /// The flat index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// Velocity value is not positive and finite.
    #[error("invalid velocity at index {index}: {value} (must be positive and finite)")]
    InvalidVelocity {
        /// The flat index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// Solver tolerance is not positive and finite.
    #[error("invalid tolerance: {0} (must be positive and finite)")]
    InvalidTolerance(f64),
    /// Tile size is zero.
    #[error("invalid tile size: {0} (must be >= 1)")]
    InvalidTileSize(usize),
    /// Array shape does not match expected shape.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// Unsupported data type in file.
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),
    /// Unsupported file format (unrecognized extension).
    #[error("unsupported file format: {0}")]
    UnsupportedFileFormat(String),
    /// A point source lies outside the solver domain.
    #[error("invalid source at {position:?}: {reason}")]
    InvalidSource {
        /// Source position in solver coordinates.
        position: Vec<f64>,
        /// Explanation of why the source is invalid.
        reason: String,
    },
    /// Maximum tile visit limit exceeded (likely indicates non-convergence).
    #[error("max tile pops exceeded: limit was {limit}")]
    MaxTilePopsExceeded {
        /// The limit that was set.
        limit: u64,
    },
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Other error with a descriptive message.
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results with TomographyError.
pub type Result<T> = std::result::Result<T, TomographyError>;
