// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::f64::consts::PI;

use rayon::prelude::*;

use crate::error::{Result, TomographyError};

/// Direct 3D Gaussian convolution with an `N x N x N` kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianSmoother {
    samples: usize,
    stdv: f64,
}

impl GaussianSmoother {
    /// Create a smoother.
    ///
    /// # Parameters
    /// - `samples`: kernel width `N`, odd and >= 1
    /// - `stdv`: standard deviation in samples; zero gives the identity
    pub fn new(samples: usize, stdv: f64) -> Result<Self> {
        if samples == 0 || samples % 2 == 0 {
            return Err(TomographyError::InvalidParameter {
                key: "gaussian_filter_samples".to_string(),
                reason: format!("{} must be odd and >= 1", samples),
            });
        }
        if !stdv.is_finite() || stdv < 0.0 {
            return Err(TomographyError::InvalidParameter {
                key: "gaussian_filter_stdv".to_string(),
                reason: format!("{} must be finite and >= 0", stdv),
            });
        }
        Ok(GaussianSmoother { samples, stdv })
    }

    /// Kernel width `N`.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Standard deviation in samples.
    pub fn stdv(&self) -> f64 {
        self.stdv
    }

    /// Half-width `N / 2`; also the padding the caller must supply for the
    /// convolution to cover the whole physical domain.
    pub fn radius(&self) -> usize {
        self.samples / 2
    }

    /// Normalized weights, flattened with the last offset fastest.
    pub fn kernel(&self) -> Vec<f64> {
        let n = self.samples;
        let r = self.radius() as f64;
        let mut kernel = vec![0.0; n * n * n];

        if self.stdv == 0.0 {
            let c = self.radius();
            kernel[(c * n + c) * n + c] = 1.0;
            return kernel;
        }

        let two_var = 2.0 * self.stdv * self.stdv;
        let scale = 1.0 / (PI * self.stdv);
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let (di, dj, dk) = (i as f64 - r, j as f64 - r, k as f64 - r);
                    let r_sq = di * di + dj * dj + dk * dk;
                    kernel[(i * n + j) * n + k] = scale * (-r_sq / two_var).exp();
                }
            }
        }
        let sum: f64 = kernel.iter().sum();
        for w in kernel.iter_mut() {
            *w /= sum;
        }
        kernel
    }

    /// Convolve `input` into `output`, both of shape `[ny, nx, nz]` with z
    /// fastest.
    ///
    /// Only cells at least `radius` samples from every face are convolved;
    /// the rest receive a copy of the input. Output columns are computed in
    /// parallel.
    pub fn smooth(&self, input: &[f64], output: &mut [f64], shape: [usize; 3]) -> Result<()> {
        let total: usize = shape.iter().product();
        if input.len() != total || output.len() != total {
            return Err(TomographyError::ShapeMismatch {
                expected: vec![total, total],
                got: vec![input.len(), output.len()],
            });
        }
        if self.stdv == 0.0 {
            output.copy_from_slice(input);
            return Ok(());
        }

        let [ny, nx, nz] = shape;
        let n = self.samples;
        let r = self.radius();
        let kernel = self.kernel();
        let inside = |v: usize, len: usize| v >= r && v + r < len;

        output
            .par_chunks_mut(nz)
            .enumerate()
            .for_each(|(column, out)| {
                let (y, x) = (column / nx, column % nx);
                let base = column * nz;
                if !inside(y, ny) || !inside(x, nx) {
                    out.copy_from_slice(&input[base..base + nz]);
                    return;
                }
                for (z, cell) in out.iter_mut().enumerate() {
                    if !inside(z, nz) {
                        *cell = input[base + z];
                        continue;
                    }
                    let mut acc = 0.0;
                    for i in 0..n {
                        for j in 0..n {
                            let row = ((y + i - r) * nx + (x + j - r)) * nz + (z - r);
                            let weights = &kernel[(i * n + j) * n..(i * n + j + 1) * n];
                            acc += weights
                                .iter()
                                .zip(&input[row..row + n])
                                .map(|(w, v)| w * v)
                                .sum::<f64>();
                        }
                    }
                    *cell = acc;
                }
            });
        Ok(())
    }
}
