// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Acquisition geometry: shot and node coordinate sets plus the per-shot
//! relational window into the node set.

use std::f64::consts::TAU;
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{Result, TomographyError};
use crate::grid::Grid;
use crate::io;

/// Whether a point is a source or a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Source position.
    Shot,
    /// Receiver position.
    Node,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Shot => write!(f, "shot"),
            Role::Node => write!(f, "node"),
        }
    }
}

/// Three parallel coordinate sequences (meters). The count is the common
/// length of the sequences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoordinateSet {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
}

impl CoordinateSet {
    /// Build from parallel sequences of equal length.
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() || x.len() != z.len() {
            return Err(TomographyError::ShapeMismatch {
                expected: vec![x.len(); 3],
                got: vec![x.len(), y.len(), z.len()],
            });
        }
        Ok(CoordinateSet { x, y, z })
    }

    /// Build from `[x, y, z]` points.
    pub fn from_points(points: &[[f64; 3]]) -> Self {
        CoordinateSet {
            x: points.iter().map(|p| p[0]).collect(),
            y: points.iter().map(|p| p[1]).collect(),
            z: points.iter().map(|p| p[2]).collect(),
        }
    }

    /// Number of points.
    pub fn total(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the set holds no points.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// The point at `index` as `[x, y, z]`.
    pub fn point(&self, index: usize) -> [f64; 3] {
        [self.x[index], self.y[index], self.z[index]]
    }

    /// Iterate over all points as `[x, y, z]`.
    pub fn points(&self) -> impl Iterator<Item = [f64; 3]> + '_ {
        (0..self.total()).map(move |i| self.point(i))
    }

    /// x coordinates.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// y coordinates.
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// z coordinates.
    pub fn z(&self) -> &[f64] {
        &self.z
    }
}

/// Per-shot half-open range into the node set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalWindow {
    begin: Vec<usize>,
    end: Vec<usize>,
}

impl RelationalWindow {
    /// Every shot sees the whole node set.
    pub fn full(total_shots: usize, total_nodes: usize) -> Self {
        RelationalWindow {
            begin: vec![0; total_shots],
            end: vec![total_nodes; total_shots],
        }
    }

    /// Build from explicit ranges, checking `0 <= begin <= end <= total_nodes`.
    pub fn from_ranges(ranges: &[Range<usize>], total_nodes: usize) -> Result<Self> {
        for (shot, r) in ranges.iter().enumerate() {
            if r.start > r.end || r.end > total_nodes {
                return Err(TomographyError::InvalidRelationalWindow {
                    shot,
                    begin: r.start,
                    end: r.end,
                    total_nodes,
                });
            }
        }
        Ok(RelationalWindow {
            begin: ranges.iter().map(|r| r.start).collect(),
            end: ranges.iter().map(|r| r.end).collect(),
        })
    }

    /// Number of shots covered.
    pub fn total_shots(&self) -> usize {
        self.begin.len()
    }

    /// Node range of `shot`.
    pub fn range(&self, shot: usize) -> Range<usize> {
        self.begin[shot]..self.end[shot]
    }

    /// Start of the range of `shot`.
    pub fn begin(&self, shot: usize) -> usize {
        self.begin[shot]
    }

    /// End (exclusive) of the range of `shot`.
    pub fn end(&self, shot: usize) -> usize {
        self.end[shot]
    }

    /// Number of nodes associated with `shot`.
    pub fn len(&self, shot: usize) -> usize {
        self.end[shot] - self.begin[shot]
    }

    /// Returns true if no shot is covered.
    pub fn is_empty(&self) -> bool {
        self.begin.is_empty()
    }
}

/// Rectangular lattice described by line counts and three corners.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeSpec {
    /// Lines along SW→SE and along SW→NW.
    pub nlines: [usize; 2],
    /// Southwest corner `[x, y, z]`.
    pub sw: [f64; 3],
    /// Northwest corner `[x, y, z]`.
    pub nw: [f64; 3],
    /// Southeast corner `[x, y, z]`.
    pub se: [f64; 3],
}

impl LatticeSpec {
    /// Generate the lattice, SW→NW lines outer and SW→SE samples inner.
    /// An axis with a single line contributes no displacement.
    pub fn build(&self) -> CoordinateSet {
        let [n1, n2] = self.nlines;
        let fraction = |i: usize, n: usize| {
            if n > 1 {
                i as f64 / (n - 1) as f64
            } else {
                0.0
            }
        };

        let mut points = Vec::with_capacity(n1 * n2);
        for j in 0..n2 {
            let fj = fraction(j, n2);
            for i in 0..n1 {
                let fi = fraction(i, n1);
                let mut p = [0.0; 3];
                for (d, value) in p.iter_mut().enumerate() {
                    *value = self.sw[d]
                        + fi * (self.se[d] - self.sw[d])
                        + fj * (self.nw[d] - self.sw[d]);
                }
                points.push(p);
            }
        }
        CoordinateSet::from_points(&points)
    }
}

/// Concentric rings of shots around a center.
#[derive(Debug, Clone, PartialEq)]
pub struct CircularSpec {
    /// Ring center `[x, y, z]`.
    pub center: [f64; 3],
    /// Target chord length between consecutive points on a ring.
    pub spacing: f64,
    /// Ring radii.
    pub offsets: Vec<f64>,
}

impl CircularSpec {
    /// Angular increment giving a chord of `spacing` on a ring of `radius`.
    pub fn angular_step(&self, radius: f64) -> f64 {
        (1.0 - self.spacing * self.spacing / (2.0 * radius * radius)).acos()
    }

    /// Generate the rings in offset order, each starting at angle zero.
    pub fn build(&self) -> CoordinateSet {
        let [xc, yc, zc] = self.center;
        let mut points = Vec::new();
        for &radius in &self.offsets {
            let step = self.angular_step(radius);
            let mut theta = 0.0_f64;
            while theta < TAU {
                points.push([xc + radius * theta.sin(), yc + radius * theta.cos(), zc]);
                theta += step;
            }
        }
        CoordinateSet::from_points(&points)
    }
}

/// Geometry variant, selected by integer code in the parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    /// Rectangular lattices for shots and nodes.
    Regular = 0,
    /// Rings of shots, rectangular lattice of nodes.
    Circular = 1,
}

impl GeometryKind {
    /// Map the `geometry_type` code to a variant.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(GeometryKind::Regular),
            1 => Some(GeometryKind::Circular),
            _ => None,
        }
    }
}

/// How shot positions are synthesized.
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    /// Both sets on rectangular lattices.
    Regular {
        /// Shot lattice.
        shots: LatticeSpec,
        /// Node lattice.
        nodes: LatticeSpec,
    },
    /// Shots on rings, nodes on a lattice.
    Circular {
        /// Shot rings.
        shots: CircularSpec,
        /// Node lattice.
        nodes: LatticeSpec,
    },
}

impl Layout {
    /// The variant this layout belongs to.
    pub fn kind(&self) -> GeometryKind {
        match self {
            Layout::Regular { .. } => GeometryKind::Regular,
            Layout::Circular { .. } => GeometryKind::Circular,
        }
    }
}

/// Where the coordinates come from.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometrySource {
    /// Read previously exported coordinate files.
    Import,
    /// Build from a layout description.
    Synthesize(Layout),
}

/// Parsed geometry section of the parameter file.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryConfig {
    /// Selected variant.
    pub kind: GeometryKind,
    /// Exchange shots and nodes after synthesis.
    pub reciprocity: bool,
    /// Import or synthesize.
    pub source: GeometrySource,
    /// Shot coordinate file (read on import, written otherwise).
    pub shots_file: PathBuf,
    /// Node coordinate file (read on import, written otherwise).
    pub nodes_file: PathBuf,
    /// Optional relational window file.
    pub relational_file: Option<PathBuf>,
}

/// Shots, nodes and their relational window. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    shots: CoordinateSet,
    nodes: CoordinateSet,
    window: RelationalWindow,
}

impl Geometry {
    /// Assemble a geometry with the default full relational window.
    pub fn new(shots: CoordinateSet, nodes: CoordinateSet) -> Self {
        let window = RelationalWindow::full(shots.total(), nodes.total());
        Geometry {
            shots,
            nodes,
            window,
        }
    }

    /// Assemble a geometry with an explicit window.
    pub fn with_window(
        shots: CoordinateSet,
        nodes: CoordinateSet,
        window: RelationalWindow,
    ) -> Result<Self> {
        if window.total_shots() != shots.total() {
            return Err(TomographyError::ShapeMismatch {
                expected: vec![shots.total()],
                got: vec![window.total_shots()],
            });
        }
        for shot in 0..window.total_shots() {
            if window.end(shot) > nodes.total() {
                return Err(TomographyError::InvalidRelationalWindow {
                    shot,
                    begin: window.begin(shot),
                    end: window.end(shot),
                    total_nodes: nodes.total(),
                });
            }
        }
        Ok(Geometry {
            shots,
            nodes,
            window,
        })
    }

    /// Synthesize shots and nodes from a layout.
    pub fn synthesize(layout: &Layout, reciprocity: bool) -> Self {
        let (shots, nodes) = match layout {
            Layout::Regular { shots, nodes } => (shots.build(), nodes.build()),
            Layout::Circular { shots, nodes } => (shots.build(), nodes.build()),
        };
        let geometry = Geometry::new(shots, nodes);
        if reciprocity {
            geometry.reciprocal()
        } else {
            geometry
        }
    }

    /// Exchange the roles of shots and nodes and regenerate the window.
    pub fn reciprocal(self) -> Self {
        debug!(
            shots = self.nodes.total(),
            nodes = self.shots.total(),
            "applying reciprocity"
        );
        Geometry::new(self.nodes, self.shots)
    }

    /// Build the geometry described by a parameter file section and check
    /// it against `grid`.
    ///
    /// Imported geometries are taken as-is; synthesized geometries are
    /// written back to the configured coordinate files once they pass the
    /// domain check.
    pub fn build(config: &GeometryConfig, grid: &Grid) -> Result<Self> {
        let geometry = match &config.source {
            GeometrySource::Import => {
                let shots = io::read_coordinates(&config.shots_file)?;
                let nodes = io::read_coordinates(&config.nodes_file)?;
                match &config.relational_file {
                    Some(path) => {
                        let ranges = io::read_ranges(path)?;
                        let window = RelationalWindow::from_ranges(&ranges, nodes.total())?;
                        Geometry::with_window(shots, nodes, window)?
                    }
                    None => Geometry::new(shots, nodes),
                }
            }
            GeometrySource::Synthesize(layout) => {
                Geometry::synthesize(layout, config.reciprocity)
            }
        };
        grid.check_geometry(&geometry)?;
        if let GeometrySource::Synthesize(_) = config.source {
            geometry.export(config)?;
        }
        info!(
            kind = ?config.kind,
            shots = geometry.total_shots(),
            nodes = geometry.total_nodes(),
            "geometry ready"
        );
        Ok(geometry)
    }

    /// Write coordinates (and the window, if a relational file is set).
    pub fn export(&self, config: &GeometryConfig) -> Result<()> {
        io::write_coordinates(&config.shots_file, &self.shots)?;
        io::write_coordinates(&config.nodes_file, &self.nodes)?;
        if let Some(path) = &config.relational_file {
            let ranges: Vec<Range<usize>> = (0..self.total_shots())
                .map(|s| self.window.range(s))
                .collect();
            io::write_ranges(path, &ranges)?;
        }
        Ok(())
    }

    /// Shot positions.
    pub fn shots(&self) -> &CoordinateSet {
        &self.shots
    }

    /// Node positions.
    pub fn nodes(&self) -> &CoordinateSet {
        &self.nodes
    }

    /// Per-shot node ranges.
    pub fn window(&self) -> &RelationalWindow {
        &self.window
    }

    /// Number of shots.
    pub fn total_shots(&self) -> usize {
        self.shots.total()
    }

    /// Number of nodes.
    pub fn total_nodes(&self) -> usize {
        self.nodes.total()
    }
}
