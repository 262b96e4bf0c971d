// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

use ndarray::{s, ArrayView3, ArrayViewMut3};

use crate::error::{Result, TomographyError};
use crate::geometry::{CoordinateSet, Geometry, Role};

/// A spatial axis of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Depth, the fastest-varying axis in every flat layout.
    Z,
    /// Inline axis.
    X,
    /// Crossline axis, the slowest-varying axis.
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Z => write!(f, "z"),
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
        }
    }
}

/// Per-side padding widths, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Boundary {
    /// Padding before the first x sample.
    pub xl: usize,
    /// Padding after the last x sample.
    pub xr: usize,
    /// Padding before the first y sample.
    pub yl: usize,
    /// Padding after the last y sample.
    pub yr: usize,
    /// Padding above the first z sample.
    pub zu: usize,
    /// Padding below the last z sample.
    pub zd: usize,
}

impl Boundary {
    /// The same width on all six sides.
    pub fn uniform(nb: usize) -> Self {
        Boundary {
            xl: nb,
            xr: nb,
            yl: nb,
            yr: nb,
            zu: nb,
            zd: nb,
        }
    }
}

/// Physical grid plus its padded (absorbing-margin) layout.
///
/// Both layouts flatten with depth fastest: `index = z + x*nz + y*nx*nz`
/// for the physical grid and the same with `nzz`, `nxx` for the padded one.
/// Only the primary fields are stored; padded sizes and point counts are
/// always derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    nx: usize,
    ny: usize,
    nz: usize,
    dx: f64,
    dy: f64,
    dz: f64,
    boundary: Boundary,
}

impl Grid {
    /// Create a grid with no padding.
    ///
    /// # Parameters
    /// - `samples`: `[nx, ny, nz]`, each must be >= 2
    /// - `spacing`: `[dx, dy, dz]` in meters, each positive and finite
    pub fn new(samples: [usize; 3], spacing: [f64; 3]) -> Result<Self> {
        let axes = [Axis::X, Axis::Y, Axis::Z];
        for (&axis, &size) in axes.iter().zip(samples.iter()) {
            if size < 2 {
                return Err(TomographyError::InvalidGridShape { axis, size });
            }
        }
        for (&axis, &value) in axes.iter().zip(spacing.iter()) {
            if !value.is_finite() || value <= 0.0 {
                return Err(TomographyError::InvalidGridSpacing { axis, value });
            }
        }
        let [nx, ny, nz] = samples;
        let [dx, dy, dz] = spacing;
        Ok(Grid {
            nx,
            ny,
            nz,
            dx,
            dy,
            dz,
            boundary: Boundary::default(),
        })
    }

    /// Replace the padding widths (builder method).
    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// Physical x samples.
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Physical y samples.
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Physical z samples.
    pub fn nz(&self) -> usize {
        self.nz
    }

    /// x spacing in meters.
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// y spacing in meters.
    pub fn dy(&self) -> f64 {
        self.dy
    }

    /// z spacing in meters.
    pub fn dz(&self) -> f64 {
        self.dz
    }

    /// Padding widths.
    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Padded x samples.
    pub fn nxx(&self) -> usize {
        self.nx + self.boundary.xl + self.boundary.xr
    }

    /// Padded y samples.
    pub fn nyy(&self) -> usize {
        self.ny + self.boundary.yl + self.boundary.yr
    }

    /// Padded z samples.
    pub fn nzz(&self) -> usize {
        self.nz + self.boundary.zu + self.boundary.zd
    }

    /// Number of physical cells.
    pub fn n_points(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Number of padded cells.
    pub fn volsize(&self) -> usize {
        self.nxx() * self.nyy() * self.nzz()
    }

    /// Number of physical samples along `axis`.
    pub fn samples(&self, axis: Axis) -> usize {
        match axis {
            Axis::Z => self.nz,
            Axis::X => self.nx,
            Axis::Y => self.ny,
        }
    }

    /// Sample spacing along `axis`.
    pub fn spacing(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Z => self.dz,
            Axis::X => self.dx,
            Axis::Y => self.dy,
        }
    }

    /// Largest valid coordinate along `axis`: `(n - 1) * spacing`.
    pub fn extent(&self, axis: Axis) -> f64 {
        (self.samples(axis) - 1) as f64 * self.spacing(axis)
    }

    /// Padded shape ordered slowest to fastest: `[nyy, nxx, nzz]`.
    pub fn padded_shape(&self) -> [usize; 3] {
        [self.nyy(), self.nxx(), self.nzz()]
    }

    /// Spacing ordered like [`Grid::padded_shape`]: `[dy, dx, dz]`.
    pub fn padded_spacing(&self) -> [f64; 3] {
        [self.dy, self.dx, self.dz]
    }

    /// Flat physical index of sample `(z, x, y)`.
    #[inline]
    pub fn index(&self, z: usize, x: usize, y: usize) -> usize {
        debug_assert!(z < self.nz && x < self.nx && y < self.ny);
        z + x * self.nz + y * self.nx * self.nz
    }

    /// Flat padded index of padded sample `(z, x, y)`.
    #[inline]
    pub fn padded_index(&self, z: usize, x: usize, y: usize) -> usize {
        let (nzz, nxx) = (self.nzz(), self.nxx());
        debug_assert!(z < nzz && x < nxx && y < self.nyy());
        z + x * nzz + y * nxx * nzz
    }

    /// Padded index of the physical sample `(z, x, y)`.
    #[inline]
    pub fn interior_index(&self, z: usize, x: usize, y: usize) -> usize {
        self.padded_index(z + self.boundary.zu, x + self.boundary.xl, y + self.boundary.yl)
    }

    /// Inverse of [`Grid::index`]: returns `(z, x, y)`.
    pub fn coordinates(&self, index: usize) -> (usize, usize, usize) {
        let y = index / (self.nx * self.nz);
        let x = (index - y * self.nx * self.nz) / self.nz;
        let z = index - x * self.nz - y * self.nx * self.nz;
        (z, x, y)
    }

    /// Map a physical position (meters) into padded-grid meters, ordered
    /// like [`Grid::padded_shape`].
    pub fn padded_position(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        [
            y + self.boundary.yl as f64 * self.dy,
            x + self.boundary.xl as f64 * self.dx,
            z + self.boundary.zu as f64 * self.dz,
        ]
    }

    /// Check that a single point lies inside the physical domain.
    ///
    /// The point is rejected if it is out of bounds on any axis.
    pub fn check_point(&self, role: Role, index: usize, point: [f64; 3]) -> Result<()> {
        let [x, y, z] = point;
        for (axis, value) in [(Axis::X, x), (Axis::Y, y), (Axis::Z, z)] {
            let max = self.extent(axis);
            if !(0.0..=max).contains(&value) {
                return Err(TomographyError::GeometryOverflow {
                    role,
                    index,
                    axis,
                    value,
                    max,
                });
            }
        }
        Ok(())
    }

    fn check_set(&self, role: Role, set: &CoordinateSet) -> Result<()> {
        for index in 0..set.total() {
            self.check_point(role, index, set.point(index))?;
        }
        Ok(())
    }

    /// Validate every shot and node against the physical domain.
    pub fn check_geometry(&self, geometry: &Geometry) -> Result<()> {
        self.check_set(Role::Shot, geometry.shots())?;
        self.check_set(Role::Node, geometry.nodes())
    }

    fn physical_view<'a>(&self, data: &'a [f64]) -> Result<ArrayView3<'a, f64>> {
        ArrayView3::from_shape((self.ny, self.nx, self.nz), data).map_err(|_| {
            TomographyError::ShapeMismatch {
                expected: vec![self.n_points()],
                got: vec![data.len()],
            }
        })
    }

    fn padded_view_mut<'a>(&self, data: &'a mut [f64]) -> Result<ArrayViewMut3<'a, f64>> {
        let expected = self.volsize();
        let got = data.len();
        ArrayViewMut3::from_shape((self.nyy(), self.nxx(), self.nzz()), data).map_err(|_| {
            TomographyError::ShapeMismatch {
                expected: vec![expected],
                got: vec![got],
            }
        })
    }

    /// Copy a physical array into the padded layout and fill the margins by
    /// edge replication.
    ///
    /// Margins are filled z first (over the interior x/y range), then x
    /// (over all z, interior y), then y (over everything), so corner and
    /// edge cells take values written by the earlier passes.
    pub fn expand(&self, physical: &[f64], padded: &mut [f64]) -> Result<()> {
        let src = self.physical_view(physical)?;
        let mut dst = self.padded_view_mut(padded)?;

        let b = self.boundary;
        let (z0, z1) = (b.zu, b.zu + self.nz);
        let (x0, x1) = (b.xl, b.xl + self.nx);
        let (y0, y1) = (b.yl, b.yl + self.ny);

        dst.slice_mut(s![y0..y1, x0..x1, z0..z1]).assign(&src);

        if b.zu > 0 {
            let edge = dst.slice(s![y0..y1, x0..x1, z0..z0 + 1]).to_owned();
            dst.slice_mut(s![y0..y1, x0..x1, ..z0]).assign(&edge);
        }
        if b.zd > 0 {
            let edge = dst.slice(s![y0..y1, x0..x1, z1 - 1..z1]).to_owned();
            dst.slice_mut(s![y0..y1, x0..x1, z1..]).assign(&edge);
        }

        if b.xl > 0 {
            let edge = dst.slice(s![y0..y1, x0..x0 + 1, ..]).to_owned();
            dst.slice_mut(s![y0..y1, ..x0, ..]).assign(&edge);
        }
        if b.xr > 0 {
            let edge = dst.slice(s![y0..y1, x1 - 1..x1, ..]).to_owned();
            dst.slice_mut(s![y0..y1, x1.., ..]).assign(&edge);
        }

        if b.yl > 0 {
            let edge = dst.slice(s![y0..y0 + 1, .., ..]).to_owned();
            dst.slice_mut(s![..y0, .., ..]).assign(&edge);
        }
        if b.yr > 0 {
            let edge = dst.slice(s![y1 - 1..y1, .., ..]).to_owned();
            dst.slice_mut(s![y1.., .., ..]).assign(&edge);
        }

        Ok(())
    }

    /// Copy the padded interior back into the physical layout.
    pub fn reduce(&self, padded: &[f64], physical: &mut [f64]) -> Result<()> {
        let expected = self.n_points();
        let got = physical.len();
        let mut dst = ArrayViewMut3::from_shape((self.ny, self.nx, self.nz), physical).map_err(
            |_| TomographyError::ShapeMismatch {
                expected: vec![expected],
                got: vec![got],
            },
        )?;
        let src = ArrayView3::from_shape((self.nyy(), self.nxx(), self.nzz()), padded).map_err(
            |_| TomographyError::ShapeMismatch {
                expected: vec![self.volsize()],
                got: vec![padded.len()],
            },
        )?;

        let b = self.boundary;
        dst.assign(&src.slice(s![
            b.yl..b.yl + self.ny,
            b.xl..b.xl + self.nx,
            b.zu..b.zu + self.nz
        ]));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_3x4x5() -> Grid {
        Grid::new([4, 5, 3], [10.0, 20.0, 5.0])
            .unwrap()
            .with_boundary(Boundary {
                xl: 1,
                xr: 2,
                yl: 0,
                yr: 3,
                zu: 2,
                zd: 1,
            })
    }

    #[test]
    fn derived_sizes_follow_boundary() {
        let grid = grid_3x4x5();
        assert_eq!(grid.nxx(), 7);
        assert_eq!(grid.nyy(), 8);
        assert_eq!(grid.nzz(), 6);
        assert_eq!(grid.n_points(), 60);
        assert_eq!(grid.volsize(), 7 * 8 * 6);

        let grid = grid.with_boundary(Boundary::uniform(0));
        assert_eq!(grid.volsize(), grid.n_points());
    }

    #[test]
    fn index_coordinates_roundtrip() {
        let grid = grid_3x4x5();
        for index in 0..grid.n_points() {
            let (z, x, y) = grid.coordinates(index);
            assert_eq!(grid.index(z, x, y), index);
        }
        assert_eq!(grid.index(1, 0, 0), 1);
        assert_eq!(grid.index(0, 1, 0), 3);
        assert_eq!(grid.index(0, 0, 1), 12);
    }

    #[test]
    fn expand_copies_interior_and_replicates_edges() {
        let grid = grid_3x4x5();
        let physical: Vec<f64> = (0..grid.n_points()).map(|i| i as f64).collect();
        let mut padded = vec![f64::NAN; grid.volsize()];
        grid.expand(&physical, &mut padded).unwrap();

        assert!(padded.iter().all(|v| !v.is_nan()));

        for y in 0..grid.ny() {
            for x in 0..grid.nx() {
                for z in 0..grid.nz() {
                    assert_eq!(
                        padded[grid.interior_index(z, x, y)],
                        physical[grid.index(z, x, y)]
                    );
                }
            }
        }

        // z margins replicate the first/last depth sample
        assert_eq!(
            padded[grid.padded_index(0, 1, 0)],
            physical[grid.index(0, 0, 0)]
        );
        assert_eq!(
            padded[grid.padded_index(5, 1, 0)],
            physical[grid.index(2, 0, 0)]
        );

        // far corner: last y, last x, last z
        let corner = padded[grid.padded_index(5, 6, 7)];
        assert_eq!(corner, physical[grid.index(2, 3, 4)]);
    }

    #[test]
    fn reduce_inverts_expand() {
        let grid = grid_3x4x5();
        let physical: Vec<f64> = (0..grid.n_points()).map(|i| (i as f64).sin()).collect();
        let mut padded = vec![0.0; grid.volsize()];
        grid.expand(&physical, &mut padded).unwrap();

        let mut back = vec![0.0; grid.n_points()];
        grid.reduce(&padded, &mut back).unwrap();
        assert_eq!(back, physical);
    }

    #[test]
    fn expand_rejects_wrong_lengths() {
        let grid = grid_3x4x5();
        let mut padded = vec![0.0; grid.volsize()];
        let result = grid.expand(&[1.0; 7], &mut padded);
        assert!(matches!(result, Err(TomographyError::ShapeMismatch { .. })));

        let mut short = vec![0.0; 3];
        let result = grid.expand(&vec![0.0; grid.n_points()], &mut short);
        assert!(matches!(result, Err(TomographyError::ShapeMismatch { .. })));
    }

    #[test]
    fn check_point_rejects_single_axis_overflow() {
        let grid = Grid::new([11, 11, 11], [10.0, 10.0, 10.0]).unwrap();
        assert!(grid.check_point(Role::Shot, 0, [0.0, 100.0, 50.0]).is_ok());

        // Only x is out of range; an AND across axes would let this through.
        let result = grid.check_point(Role::Shot, 4, [100.5, 50.0, 50.0]);
        assert!(matches!(
            result,
            Err(TomographyError::GeometryOverflow {
                role: Role::Shot,
                index: 4,
                axis: Axis::X,
                ..
            })
        ));

        let result = grid.check_point(Role::Node, 1, [10.0, 10.0, -0.1]);
        assert!(matches!(
            result,
            Err(TomographyError::GeometryOverflow { axis: Axis::Z, .. })
        ));
    }

    #[test]
    fn invalid_grid_parameters() {
        assert!(matches!(
            Grid::new([1, 4, 4], [1.0, 1.0, 1.0]),
            Err(TomographyError::InvalidGridShape {
                axis: Axis::X,
                size: 1
            })
        ));
        assert!(matches!(
            Grid::new([4, 4, 4], [1.0, 1.0, 0.0]),
            Err(TomographyError::InvalidGridSpacing { axis: Axis::Z, .. })
        ));
    }
}
