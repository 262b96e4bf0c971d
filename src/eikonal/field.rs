// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, TomographyError};
use crate::grid::Axis;

/// Default tile edge length (nodes per axis).
pub const DEFAULT_TILE_SIZE: usize = 4;

/// Travel-time and slowness storage on a padded 3D grid.
///
/// Indices are `[y, x, z]` with z fastest, matching the padded model
/// layout, so slowness buffers can be shared without reordering. The
/// travel time is stored as `f64` bits in atomics so tiles can be
/// relaxed concurrently.
pub struct TravelTimeField {
    shape: [usize; 3],
    strides: [usize; 3],
    spacing: [f64; 3],
    travel_time: Box<[AtomicU64]>,
    slowness: Box<[f64]>,
    tile_size: [usize; 3],
    tile_counts: [usize; 3],
    tile_strides: [usize; 3],
}

fn validate_slowness(slowness: &[f64]) -> Result<()> {
    for (index, &value) in slowness.iter().enumerate() {
        if !value.is_finite() || value <= 0.0 {
            return Err(TomographyError::InvalidSlowness { index, value });
        }
    }
    Ok(())
}

impl TravelTimeField {
    /// Create a field with the given shape, per-axis spacing and slowness.
    ///
    /// # Parameters
    /// - `shape`: `[ny, nx, nz]` nodes, each >= 2
    /// - `spacing`: `[dy, dx, dz]`, each positive and finite
    /// - `slowness`: z-fastest values, all positive and finite
    pub fn new(shape: [usize; 3], spacing: [f64; 3], slowness: Vec<f64>) -> Result<Self> {
        let axes = [Axis::Y, Axis::X, Axis::Z];
        for d in 0..3 {
            if !spacing[d].is_finite() || spacing[d] <= 0.0 {
                return Err(TomographyError::InvalidGridSpacing {
                    axis: axes[d],
                    value: spacing[d],
                });
            }
            if shape[d] < 2 {
                return Err(TomographyError::InvalidGridShape {
                    axis: axes[d],
                    size: shape[d],
                });
            }
        }

        let num_nodes: usize = shape.iter().product();
        if slowness.len() != num_nodes {
            return Err(TomographyError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![slowness.len()],
            });
        }
        validate_slowness(&slowness)?;

        let strides = [shape[1] * shape[2], shape[2], 1];
        let travel_time: Box<[AtomicU64]> = (0..num_nodes)
            .map(|_| AtomicU64::new(f64::INFINITY.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let mut field = TravelTimeField {
            shape,
            strides,
            spacing,
            travel_time,
            slowness: slowness.into_boxed_slice(),
            tile_size: [1; 3],
            tile_counts: shape,
            tile_strides: [0; 3],
        };
        field.set_tiling(DEFAULT_TILE_SIZE);
        Ok(field)
    }

    /// Use cubic tiles of edge `tile` (builder method). Tiles are clamped to
    /// the grid on short axes.
    pub fn with_tile_size(mut self, tile: usize) -> Result<Self> {
        if tile == 0 {
            return Err(TomographyError::InvalidTileSize(tile));
        }
        self.set_tiling(tile);
        Ok(self)
    }

    fn set_tiling(&mut self, tile: usize) {
        for d in 0..3 {
            self.tile_size[d] = tile.min(self.shape[d]);
            self.tile_counts[d] = self.shape[d].div_ceil(self.tile_size[d]);
        }
        self.tile_strides = [
            self.tile_counts[1] * self.tile_counts[2],
            self.tile_counts[2],
            1,
        ];
    }

    /// Replace the slowness field, keeping shape and tiling.
    pub fn set_slowness(&mut self, slowness: &[f64]) -> Result<()> {
        if slowness.len() != self.slowness.len() {
            return Err(TomographyError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: vec![slowness.len()],
            });
        }
        validate_slowness(slowness)?;
        self.slowness.copy_from_slice(slowness);
        Ok(())
    }

    /// Set every travel time back to infinity.
    pub fn reset(&self) {
        for t in self.travel_time.iter() {
            t.store(f64::INFINITY.to_bits(), Ordering::Relaxed);
        }
    }

    /// Travel time at `idx`.
    #[inline]
    pub fn get_u(&self, idx: [usize; 3]) -> f64 {
        f64::from_bits(self.travel_time[self.nd_to_flat(idx)].load(Ordering::Relaxed))
    }

    /// Slowness at `idx`.
    #[inline]
    pub fn get_f(&self, idx: [usize; 3]) -> f64 {
        self.slowness[self.nd_to_flat(idx)]
    }

    /// Atomically lower the travel time at `idx` to `val`.
    /// Returns false if the stored value was already smaller or equal.
    pub fn update_u(&self, idx: [usize; 3], val: f64) -> bool {
        let atom = &self.travel_time[self.nd_to_flat(idx)];
        let mut current = atom.load(Ordering::Relaxed);
        loop {
            if f64::from_bits(current) <= val {
                return false;
            }
            match atom.compare_exchange_weak(
                current,
                val.to_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// `[ny, nx, nz]`.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// `[dy, dx, dz]`.
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// Largest spacing over the three axes.
    pub fn max_spacing(&self) -> f64 {
        self.spacing.iter().copied().fold(0.0, f64::max)
    }

    /// Total node count.
    pub fn num_nodes(&self) -> usize {
        self.travel_time.len()
    }

    /// Slowness values, z fastest.
    pub fn slowness(&self) -> &[f64] {
        &self.slowness
    }

    /// Snapshot of all travel times, z fastest.
    pub fn travel_times(&self) -> Vec<f64> {
        self.travel_time
            .iter()
            .map(|t| f64::from_bits(t.load(Ordering::Relaxed)))
            .collect()
    }

    #[inline]
    pub(crate) fn nd_to_flat(&self, idx: [usize; 3]) -> usize {
        idx[0] * self.strides[0] + idx[1] * self.strides[1] + idx[2]
    }

    /// Tile edge lengths per axis.
    pub fn tile_size(&self) -> [usize; 3] {
        self.tile_size
    }

    /// Number of tiles along each axis.
    pub fn tile_counts(&self) -> [usize; 3] {
        self.tile_counts
    }

    /// Total number of tiles.
    pub fn num_tiles(&self) -> usize {
        self.tile_counts.iter().product()
    }

    pub(crate) fn tile_id_to_nd(&self, tile_id: usize) -> [usize; 3] {
        let t0 = tile_id / self.tile_strides[0];
        let rem = tile_id % self.tile_strides[0];
        [t0, rem / self.tile_strides[1], rem % self.tile_strides[1]]
    }

    pub(crate) fn nd_to_tile_id(&self, tile_idx: [usize; 3]) -> usize {
        tile_idx[0] * self.tile_strides[0] + tile_idx[1] * self.tile_strides[1] + tile_idx[2]
    }

    /// Tile containing node `idx`.
    pub(crate) fn tile_of(&self, idx: [usize; 3]) -> usize {
        self.nd_to_tile_id([
            idx[0] / self.tile_size[0],
            idx[1] / self.tile_size[1],
            idx[2] / self.tile_size[2],
        ])
    }

    /// Node ranges `(start, end)` covered by a tile, clamped to the grid.
    pub(crate) fn tile_extent(&self, tile_idx: [usize; 3]) -> [(usize, usize); 3] {
        let mut extent = [(0usize, 0usize); 3];
        for (d, e) in extent.iter_mut().enumerate() {
            let start = tile_idx[d] * self.tile_size[d];
            *e = (start, (start + self.tile_size[d]).min(self.shape[d]));
        }
        extent
    }

    /// Largest valid position along axis `d`.
    pub fn extent(&self, d: usize) -> f64 {
        (self.shape[d] - 1) as f64 * self.spacing[d]
    }

    fn clamp_position(&self, position: [f64; 3]) -> [f64; 3] {
        let mut p = position;
        for (d, v) in p.iter_mut().enumerate() {
            *v = v.clamp(0.0, self.extent(d));
        }
        p
    }

    /// Trilinear interpolation of the travel time at `position` (meters,
    /// `[y, x, z]`). Positions outside the grid are clamped onto it.
    pub fn interpolate(&self, position: [f64; 3]) -> f64 {
        let p = self.clamp_position(position);
        let mut base = [0usize; 3];
        let mut frac = [0.0; 3];
        for d in 0..3 {
            let s = p[d] / self.spacing[d];
            let i = (s.floor() as usize).min(self.shape[d] - 2);
            base[d] = i;
            frac[d] = (s - i as f64).clamp(0.0, 1.0);
        }

        let mut value = 0.0;
        for corner in 0..8 {
            let mut idx = base;
            let mut weight = 1.0;
            for d in 0..3 {
                if corner & (1 << d) != 0 {
                    idx[d] += 1;
                    weight *= frac[d];
                } else {
                    weight *= 1.0 - frac[d];
                }
            }
            if weight > 0.0 {
                value += weight * self.get_u(idx);
            }
        }
        value
    }

    /// Travel-time gradient at `position` by central differences of the
    /// interpolated field, one half-cell either side.
    pub fn gradient(&self, position: [f64; 3]) -> [f64; 3] {
        let p = self.clamp_position(position);
        let mut g = [0.0; 3];
        for d in 0..3 {
            let half = 0.5 * self.spacing[d];
            let mut lo = p;
            let mut hi = p;
            lo[d] = (p[d] - half).max(0.0);
            hi[d] = (p[d] + half).min(self.extent(d));
            let span = hi[d] - lo[d];
            if span > 0.0 {
                g[d] = (self.interpolate(hi) - self.interpolate(lo)) / span;
            }
        }
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn field(shape: [usize; 3]) -> TravelTimeField {
        let n = shape.iter().product();
        TravelTimeField::new(shape, [1.0, 2.0, 0.5], vec![1.0; n]).unwrap()
    }

    #[test]
    fn tile_id_nd_roundtrip() {
        let f = field([9, 6, 13]).with_tile_size(4).unwrap();
        assert_eq!(f.tile_counts(), [3, 2, 4]);
        for id in 0..f.num_tiles() {
            assert_eq!(f.nd_to_tile_id(f.tile_id_to_nd(id)), id);
        }
    }

    #[test]
    fn tile_extent_partial_tile() {
        let f = field([9, 6, 13]).with_tile_size(4).unwrap();
        assert_eq!(f.tile_extent([2, 1, 3]), [(8, 9), (4, 6), (12, 13)]);
        assert_eq!(f.tile_of([8, 5, 12]), f.nd_to_tile_id([2, 1, 3]));
    }

    #[test]
    fn tile_size_clamped_to_short_axis() {
        let f = field([2, 10, 10]).with_tile_size(8).unwrap();
        assert_eq!(f.tile_size(), [2, 8, 8]);
        assert!(matches!(
            field([4, 4, 4]).with_tile_size(0),
            Err(TomographyError::InvalidTileSize(0))
        ));
    }

    #[test]
    fn update_u_monotonicity() {
        let f = field([4, 4, 4]);
        let idx = [1, 2, 3];
        assert!(f.update_u(idx, 10.0));
        assert!(f.update_u(idx, 5.0));
        assert!(!f.update_u(idx, 7.0));
        assert!(!f.update_u(idx, 5.0));
        assert_eq!(f.get_u(idx), 5.0);

        f.reset();
        assert!(f.get_u(idx).is_infinite());
    }

    #[test]
    fn cas_concurrent_monotonicity() {
        let f = Arc::new(field([4, 4, 4]));
        let idx = [1, 1, 1];
        let mut handles = Vec::new();
        for i in 0..8 {
            let f = Arc::clone(&f);
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    f.update_u(idx, 1000.0 - (i * 100 + j) as f64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(f.get_u(idx), 201.0);
    }

    #[test]
    fn interpolation_is_exact_for_linear_fields() {
        let f = field([5, 5, 5]);
        let [dy, dx, dz] = f.spacing();
        for y in 0..5 {
            for x in 0..5 {
                for z in 0..5 {
                    let t = 2.0 * y as f64 * dy + 3.0 * x as f64 * dx - z as f64 * dz + 10.0;
                    f.update_u([y, x, z], t);
                }
            }
        }
        let p = [1.3, 5.1, 0.7];
        let expected = 2.0 * p[0] + 3.0 * p[1] - p[2] + 10.0;
        assert!((f.interpolate(p) - expected).abs() < 1e-10);

        let g = f.gradient(p);
        assert!((g[0] - 2.0).abs() < 1e-10);
        assert!((g[1] - 3.0).abs() < 1e-10);
        assert!((g[2] + 1.0).abs() < 1e-10);
    }

    #[test]
    fn set_slowness_validates() {
        let mut f = field([3, 3, 3]);
        assert!(f.set_slowness(&[2.0; 27]).is_ok());
        assert_eq!(f.get_f([2, 2, 2]), 2.0);

        let mut bad = vec![1.0; 27];
        bad[4] = f64::NAN;
        assert!(matches!(
            f.set_slowness(&bad),
            Err(TomographyError::InvalidSlowness { index: 4, .. })
        ));
        assert!(matches!(
            f.set_slowness(&[1.0; 8]),
            Err(TomographyError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn invalid_construction() {
        assert!(matches!(
            TravelTimeField::new([1, 4, 4], [1.0; 3], vec![1.0; 16]),
            Err(TomographyError::InvalidGridShape { axis: Axis::Y, size: 1 })
        ));
        assert!(matches!(
            TravelTimeField::new([4, 4, 4], [1.0, -1.0, 1.0], vec![1.0; 64]),
            Err(TomographyError::InvalidGridSpacing { axis: Axis::X, .. })
        ));
    }
}
