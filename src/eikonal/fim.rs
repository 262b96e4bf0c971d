// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::SegQueue;
use rayon::prelude::*;
use tracing::debug;

use super::field::{TravelTimeField, DEFAULT_TILE_SIZE};
use super::kernels::update_node;
use crate::error::{Result, TomographyError};

/// Tunables of the tiled Fast Iterative Method.
#[derive(Debug, Clone, PartialEq)]
pub struct FimConfig {
    /// Largest per-node change (seconds) below which a tile counts as converged.
    pub tolerance: f64,
    /// Tile edge length in nodes.
    pub tile_size: usize,
    /// Sweeps per tile visit.
    pub max_local_iters: usize,
    /// Abort after this many tile visits. Defaults to 100 per tile.
    pub max_tile_pops: Option<u64>,
}

impl Default for FimConfig {
    fn default() -> Self {
        FimConfig {
            tolerance: 1e-6,
            tile_size: DEFAULT_TILE_SIZE,
            max_local_iters: 4,
            max_tile_pops: None,
        }
    }
}

/// Counters reported by [`FimSolver::solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SolveStats {
    /// Parallel rounds executed.
    pub rounds: usize,
    /// Tile visits over all rounds.
    pub tile_pops: u64,
}

struct AtomicBitset {
    bits: Box<[AtomicU64]>,
}

impl AtomicBitset {
    fn new(num_bits: usize) -> Self {
        let bits: Box<[AtomicU64]> = (0..num_bits.div_ceil(64))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        AtomicBitset { bits }
    }

    fn try_set(&self, id: usize) -> bool {
        let bit = 1u64 << (id % 64);
        let prev = self.bits[id / 64].fetch_or(bit, Ordering::AcqRel);
        (prev & bit) == 0
    }

    fn clear(&self, id: usize) {
        let bit = 1u64 << (id % 64);
        self.bits[id / 64].fetch_and(!bit, Ordering::Release);
    }
}

/// Deduplicating set of tiles awaiting a visit.
struct TileQueue {
    queue: SegQueue<usize>,
    bitset: AtomicBitset,
}

impl TileQueue {
    fn new(num_tiles: usize) -> Self {
        TileQueue {
            queue: SegQueue::new(),
            bitset: AtomicBitset::new(num_tiles),
        }
    }

    fn push_if_new(&self, tile_id: usize) -> bool {
        if self.bitset.try_set(tile_id) {
            self.queue.push(tile_id);
            true
        } else {
            false
        }
    }

    /// Take every queued tile, leaving the queue empty for the next round.
    fn drain(&self) -> Vec<usize> {
        let mut tiles = Vec::with_capacity(self.queue.len());
        while let Some(id) = self.queue.pop() {
            self.bitset.clear(id);
            tiles.push(id);
        }
        tiles
    }
}

/// Parallel tiled Fast Iterative Method for a point source on a
/// [`TravelTimeField`].
///
/// Each round visits the active tiles in parallel on the current rayon
/// pool. A visited tile sweeps its nodes up to `max_local_iters` times,
/// re-queues itself if it has not converged and activates face neighbors
/// whose shared boundary changed. Results of multi-threaded solves may
/// differ at rounding level from run to run.
pub struct FimSolver {
    field: TravelTimeField,
    config: FimConfig,
    initial_tiles: Vec<usize>,
}

impl FimSolver {
    /// Wrap a field, applying the configured tiling.
    pub fn new(field: TravelTimeField, config: FimConfig) -> Result<Self> {
        if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
            return Err(TomographyError::InvalidTolerance(config.tolerance));
        }
        let field = field.with_tile_size(config.tile_size)?;
        Ok(FimSolver {
            field,
            config,
            initial_tiles: Vec::new(),
        })
    }

    /// The travel-time field.
    pub fn field(&self) -> &TravelTimeField {
        &self.field
    }

    /// Replace the slowness used by subsequent solves.
    pub fn set_slowness(&mut self, slowness: &[f64]) -> Result<()> {
        self.field.set_slowness(slowness)
    }

    /// Forget all sources and travel times.
    pub fn reset(&mut self) {
        self.field.reset();
        self.initial_tiles.clear();
    }

    /// Seed a point source at `position` (meters, `[y, x, z]`).
    ///
    /// Every node within two of the largest spacings gets the straight-ray
    /// time using the slowness of the node nearest the source.
    pub fn add_source(&mut self, position: [f64; 3]) -> Result<()> {
        let shape = self.field.shape();
        let spacing = self.field.spacing();

        for d in 0..3 {
            let max = self.field.extent(d);
            if !(0.0..=max).contains(&position[d]) {
                return Err(TomographyError::InvalidSource {
                    position: position.to_vec(),
                    reason: format!("axis {} is outside [0, {}]", d, max),
                });
            }
        }

        let radius = 2.0 * self.field.max_spacing();
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        let mut nearest = [0usize; 3];
        for d in 0..3 {
            let h = spacing[d];
            let last = (shape[d] - 1) as f64;
            lo[d] = ((position[d] - radius) / h).floor().max(0.0) as usize;
            hi[d] = ((position[d] + radius) / h).ceil().min(last) as usize;
            nearest[d] = ((position[d] / h).round() as usize).min(shape[d] - 1);
        }
        let f_source = self.field.get_f(nearest);

        for y in lo[0]..=hi[0] {
            for x in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    let idx = [y, x, z];
                    let dist = idx
                        .iter()
                        .zip(spacing.iter().zip(position.iter()))
                        .map(|(&i, (&h, &p))| (i as f64 * h - p).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    if dist <= radius {
                        self.field.update_u(idx, f_source * dist);
                        let tile = self.field.tile_of(idx);
                        if !self.initial_tiles.contains(&tile) {
                            self.initial_tiles.push(tile);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Propagate travel times from the seeded sources until every tile has
    /// converged.
    ///
    /// # Errors
    /// Returns [`TomographyError::MaxTilePopsExceeded`] if the visit limit is hit.
    pub fn solve(&self) -> Result<SolveStats> {
        let num_tiles = self.field.num_tiles();
        let queue = TileQueue::new(num_tiles);
        for &tile in &self.initial_tiles {
            queue.push_if_new(tile);
        }

        let max_tile_pops = self
            .config
            .max_tile_pops
            .unwrap_or(100 * num_tiles as u64);
        let mut stats = SolveStats::default();

        loop {
            let active = queue.drain();
            if active.is_empty() {
                break;
            }
            stats.tile_pops += active.len() as u64;
            if stats.tile_pops > max_tile_pops {
                return Err(TomographyError::MaxTilePopsExceeded {
                    limit: max_tile_pops,
                });
            }
            stats.rounds += 1;
            active
                .par_iter()
                .for_each(|&tile_id| self.process_tile(tile_id, &queue));
        }

        debug!(
            rounds = stats.rounds,
            tile_pops = stats.tile_pops,
            tiles = num_tiles,
            "fim solve converged"
        );
        Ok(stats)
    }

    fn process_tile(&self, tile_id: usize, queue: &TileQueue) {
        let tile_idx = self.field.tile_id_to_nd(tile_id);
        let extent = self.field.tile_extent(tile_idx);
        let tile_counts = self.field.tile_counts();

        // [axis0_low, axis0_high, axis1_low, axis1_high, axis2_low, axis2_high]
        let mut face_changed = [false; 6];
        let mut converged = false;

        for k in 0..self.config.max_local_iters {
            let dir = k % 8;
            let order = |d: usize| -> Vec<usize> {
                let (start, end) = extent[d];
                if dir & (1 << d) != 0 {
                    (start..end).rev().collect()
                } else {
                    (start..end).collect()
                }
            };
            let (ys, xs, zs) = (order(0), order(1), order(2));

            let mut max_change: f64 = 0.0;
            for &y in &ys {
                for &x in &xs {
                    for &z in &zs {
                        let idx = [y, x, z];
                        let old = self.field.get_u(idx);
                        let new_val = update_node(&self.field, idx);
                        if new_val < old && self.field.update_u(idx, new_val) {
                            let change = old - new_val;
                            max_change = max_change.max(change);
                            if change > self.config.tolerance {
                                for d in 0..3 {
                                    if idx[d] == extent[d].0 {
                                        face_changed[2 * d] = true;
                                    }
                                    if idx[d] + 1 == extent[d].1 {
                                        face_changed[2 * d + 1] = true;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            if max_change < self.config.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            queue.push_if_new(tile_id);
        }

        for d in 0..3 {
            if face_changed[2 * d] && tile_idx[d] > 0 {
                let mut neighbor = tile_idx;
                neighbor[d] -= 1;
                queue.push_if_new(self.field.nd_to_tile_id(neighbor));
            }
            if face_changed[2 * d + 1] && tile_idx[d] + 1 < tile_counts[d] {
                let mut neighbor = tile_idx;
                neighbor[d] += 1;
                queue.push_if_new(self.field.nd_to_tile_id(neighbor));
            }
        }
    }
}
