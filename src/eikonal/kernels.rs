// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use super::field::TravelTimeField;

/// Upwind neighbor along one axis: travel time, spacing, edge slowness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Upwind {
    /// Neighbor travel time.
    pub u: f64,
    /// Spacing along the neighbor's axis.
    pub h: f64,
    /// Slowness averaged along the edge to the neighbor.
    pub f: f64,
}

/// Solve the Godunov upwind discretization for one node.
///
/// Finds the largest `u` satisfying `sum_k ((u - a_k) / h_k)^2 = f_eff^2` over
/// the smallest `m` neighbors, where `f_eff` is the RMS of their edge slowness.
/// Starts from the 1D update and adds neighbors while the candidate exceeds
/// the next neighbor value. Neighbors with infinite travel time are ignored.
pub fn solve_local(mut neighbors: [Upwind; 3]) -> f64 {
    neighbors.sort_by(|a, b| a.u.partial_cmp(&b.u).unwrap_or(std::cmp::Ordering::Equal));
    let finite = neighbors.iter().filter(|n| n.u.is_finite()).count();
    if finite == 0 {
        return f64::INFINITY;
    }

    let first = neighbors[0];
    let mut best = first.u + first.f * first.h;

    let (mut a, mut b, mut c, mut f_sq) = (0.0, 0.0, 0.0, 0.0);
    for m in 0..finite {
        let n = neighbors[m];
        let w = 1.0 / (n.h * n.h);
        a += w;
        b += n.u * w;
        c += n.u * n.u * w;
        f_sq += n.f * n.f;

        if m == 0 {
            continue;
        }
        if best <= n.u {
            break;
        }

        // a*u^2 - 2*b*u + (c - f_eff^2) = 0
        let f_eff_sq = f_sq / (m + 1) as f64;
        let disc = b * b - a * (c - f_eff_sq);
        if disc < 0.0 {
            break;
        }
        let u = (b + disc.sqrt()) / a;
        if u < n.u {
            break;
        }
        best = u;
    }
    best
}

#[inline]
fn edge_slowness(f_node: f64, f_neighbor: f64) -> f64 {
    0.5 * (f_node + f_neighbor)
}

/// Compute the candidate travel time for node `idx` from its six neighbors.
///
/// Picks the upwind (smaller) neighbor per axis, averages slowness along
/// that edge, and calls [`solve_local`].
pub fn update_node(field: &TravelTimeField, idx: [usize; 3]) -> f64 {
    let shape = field.shape();
    let spacing = field.spacing();
    let f = field.get_f(idx);

    let mut upwind = [Upwind {
        u: f64::INFINITY,
        h: 1.0,
        f,
    }; 3];

    for d in 0..3 {
        let mut best = (f64::INFINITY, f);
        if idx[d] > 0 {
            let mut lo = idx;
            lo[d] -= 1;
            best = (field.get_u(lo), field.get_f(lo));
        }
        if idx[d] + 1 < shape[d] {
            let mut hi = idx;
            hi[d] += 1;
            let u_hi = field.get_u(hi);
            if u_hi < best.0 {
                best = (u_hi, field.get_f(hi));
            }
        }
        upwind[d] = Upwind {
            u: best.0,
            h: spacing[d],
            f: edge_slowness(f, best.1),
        };
    }

    solve_local(upwind)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INF: f64 = f64::INFINITY;

    fn n(u: f64, h: f64, f: f64) -> Upwind {
        Upwind { u, h, f }
    }

    #[test]
    fn no_finite_neighbors() {
        assert!(solve_local([n(INF, 1.0, 1.0); 3]).is_infinite());
    }

    #[test]
    fn one_dimensional_update() {
        let u = solve_local([n(2.0, 0.5, 3.0), n(INF, 1.0, 1.0), n(INF, 1.0, 1.0)]);
        assert!((u - 3.5).abs() < 1e-12);
    }

    #[test]
    fn two_equal_neighbors() {
        // ((u-0)/1)^2 * 2 = 1  =>  u = 1/sqrt(2)
        let u = solve_local([n(0.0, 1.0, 1.0), n(0.0, 1.0, 1.0), n(INF, 1.0, 1.0)]);
        assert!((u - 0.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn three_equal_neighbors() {
        let u = solve_local([n(0.0, 1.0, 1.0); 3]);
        assert!((u - (1.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn far_neighbor_is_dropped() {
        // 1D candidate 1.0 does not exceed the second neighbor at 5.0.
        let u = solve_local([n(5.0, 1.0, 1.0), n(0.0, 1.0, 1.0), n(INF, 1.0, 1.0)]);
        assert!((u - 1.0).abs() < 1e-12);
    }

    #[test]
    fn anisotropic_spacing() {
        // (u/1)^2 + (u/2)^2 = 1  =>  u = 2/sqrt(5)
        let u = solve_local([n(0.0, 1.0, 1.0), n(0.0, 2.0, 1.0), n(INF, 1.0, 1.0)]);
        assert!((u - 2.0 / 5.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn update_never_below_upwind() {
        for &(a, b, c) in &[(0.0, 0.3, 0.9), (1.0, 1.0, 1.2), (0.0, 0.0, 10.0)] {
            let u = solve_local([n(a, 1.0, 1.0), n(b, 1.0, 1.0), n(c, 1.0, 1.0)]);
            assert!(u >= a && u.is_finite());
            assert!(u <= a + 1.0 + 1e-12);
        }
    }

    #[test]
    fn node_update_from_field() {
        let field = TravelTimeField::new([3, 3, 3], [1.0, 1.0, 1.0], vec![2.0; 27]).unwrap();
        field.update_u([1, 1, 0], 0.0);
        let u = update_node(&field, [1, 1, 1]);
        assert!((u - 2.0).abs() < 1e-12);
    }
}
