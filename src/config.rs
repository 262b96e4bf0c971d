// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Flat `key = value` parameter files and the typed sections read from them.
//!
//! Every section is parsed up front so configuration errors surface before
//! any grid or geometry work starts.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::eikonal::FimConfig;
use crate::error::{Result, TomographyError};
use crate::geometry::{
    CircularSpec, GeometryConfig, GeometryKind, GeometrySource, LatticeSpec, Layout,
};
use crate::grid::{Boundary, Grid};
use crate::smoothing::GaussianSmoother;
use crate::tomography::{InversionKind, SlownessBounds};

/// Receiver travel-time files written by forward modeling and read back as
/// observed data unless overridden.
pub const DEFAULT_DATA_PREFIX: &str = "travel_time_shot_";

/// Parsed parameter file.
#[derive(Debug, Clone, Default)]
pub struct ParameterFile {
    values: HashMap<String, String>,
}

fn invalid(key: &str, reason: impl Into<String>) -> TomographyError {
    TomographyError::InvalidParameter {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| TomographyError::Parse {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

impl ParameterFile {
    /// Read and parse a parameter file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_with_origin(&text, path)
    }

    /// Parse parameter text. `#` starts a comment; later keys win.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_origin(text, Path::new("<parameters>"))
    }

    fn parse_with_origin(text: &str, origin: &Path) -> Result<Self> {
        let mut values = HashMap::new();
        for (i, line) in text.lines().enumerate() {
            let content = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            }
            .trim();
            if content.is_empty() {
                continue;
            }
            let Some((key, value)) = content.split_once('=') else {
                return Err(TomographyError::MalformedFile {
                    path: origin.to_path_buf(),
                    line: i + 1,
                    reason: "expected 'key = value'".to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(TomographyError::MalformedFile {
                    path: origin.to_path_buf(),
                    line: i + 1,
                    reason: "empty key".to_string(),
                });
            }
            let value = value.trim().trim_matches('"');
            values.insert(key.to_string(), value.to_string());
        }
        Ok(ParameterFile { values })
    }

    /// Raw value of `key`, if present and non-empty.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.raw(key).ok_or_else(|| TomographyError::MissingParameter {
            key: key.to_string(),
        })
    }

    /// Required typed value.
    pub fn get<T: FromStr>(&self, key: &str) -> Result<T>
    where
        T::Err: Display,
    {
        parse_value(key, self.required(key)?)
    }

    /// Optional typed value.
    pub fn get_opt<T: FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: Display,
    {
        self.raw(key).map(|raw| parse_value(key, raw)).transpose()
    }

    /// Typed value with a fallback.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T>
    where
        T::Err: Display,
    {
        Ok(self.get_opt(key)?.unwrap_or(default))
    }

    /// Boolean value; accepts `true`/`false` and `1`/`0`, case-insensitive.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(TomographyError::Parse {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: "expected true or false".to_string(),
                }),
            },
        }
    }

    /// Comma-separated list, optionally wrapped in brackets.
    pub fn get_list<T: FromStr>(&self, key: &str) -> Result<Vec<T>>
    where
        T::Err: Display,
    {
        let raw = self.required(key)?;
        let inner = raw
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .unwrap_or(raw);
        inner
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| parse_value(key, item))
            .collect()
    }

    /// Exactly three comma-separated numbers.
    pub fn get_triple(&self, key: &str) -> Result<[f64; 3]> {
        let list: Vec<f64> = self.get_list(key)?;
        match list.as_slice() {
            &[a, b, c] => Ok([a, b, c]),
            _ => Err(invalid(
                key,
                format!("expected 3 values, found {}", list.len()),
            )),
        }
    }

    fn path_or(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.raw(key).unwrap_or(default))
    }

    /// Grid dimensions, spacing and padding.
    ///
    /// `boundary_samples` pads every side; `boundary_xl` and friends
    /// override single sides.
    pub fn grid(&self) -> Result<Grid> {
        let samples = [
            self.get("x_samples")?,
            self.get("y_samples")?,
            self.get("z_samples")?,
        ];
        let spacing = [
            self.get("x_spacing")?,
            self.get("y_spacing")?,
            self.get("z_spacing")?,
        ];
        let nb: usize = self.get_or("boundary_samples", 0)?;
        let boundary = Boundary {
            xl: self.get_or("boundary_xl", nb)?,
            xr: self.get_or("boundary_xr", nb)?,
            yl: self.get_or("boundary_yl", nb)?,
            yr: self.get_or("boundary_yr", nb)?,
            zu: self.get_or("boundary_zu", nb)?,
            zd: self.get_or("boundary_zd", nb)?,
        };
        Ok(Grid::new(samples, spacing)?.with_boundary(boundary))
    }

    fn lattice(&self, set: &str) -> Result<LatticeSpec> {
        let key = format!("{}_nlines", set);
        let counts: Vec<usize> = self.get_list(&key)?;
        let nlines = match counts.as_slice() {
            &[n1, n2] | &[n1, n2, 1] => [n1, n2],
            _ => {
                return Err(invalid(
                    &key,
                    "expected two line counts (a third is allowed only if it is 1)",
                ))
            }
        };
        if nlines.contains(&0) {
            return Err(invalid(&key, "line counts must be >= 1"));
        }
        Ok(LatticeSpec {
            nlines,
            sw: self.get_triple(&format!("{}_SW", set))?,
            nw: self.get_triple(&format!("{}_NW", set))?,
            se: self.get_triple(&format!("{}_SE", set))?,
        })
    }

    fn circular(&self) -> Result<CircularSpec> {
        let spacing: f64 = self.get("spacing")?;
        if !spacing.is_finite() || spacing <= 0.0 {
            return Err(invalid("spacing", "must be positive"));
        }
        // Ring center is given depth first: zc, xc, yc.
        let [zc, xc, yc] = self.get_triple("center")?;
        let offsets: Vec<f64> = self.get_list("offsets")?;
        if offsets.is_empty() {
            return Err(invalid("offsets", "at least one radius is required"));
        }
        for &r in &offsets {
            if !r.is_finite() || r <= 0.0 {
                return Err(invalid("offsets", format!("radius {} must be positive", r)));
            }
            if spacing >= 2.0 * r {
                return Err(invalid(
                    "offsets",
                    format!("spacing {} must be below the ring diameter {}", spacing, 2.0 * r),
                ));
            }
        }
        let spec = CircularSpec {
            center: [xc, yc, zc],
            spacing,
            offsets,
        };
        // A chord far below the radius rounds the ring angle to zero.
        for &r in &spec.offsets {
            let step = spec.angular_step(r);
            if !step.is_finite() || step <= 0.0 {
                return Err(invalid(
                    "spacing",
                    format!("spacing {} is too small for a ring of radius {}", spacing, r),
                ));
            }
        }
        Ok(spec)
    }

    /// Acquisition geometry section.
    pub fn geometry(&self) -> Result<GeometryConfig> {
        let code: i64 = self.get("geometry_type")?;
        let kind = GeometryKind::from_code(code)
            .ok_or_else(|| invalid("geometry_type", format!("unknown geometry code {}", code)))?;

        let source = if self.get_bool_or("import_geometry", false)? {
            GeometrySource::Import
        } else {
            let layout = match kind {
                GeometryKind::Regular => Layout::Regular {
                    shots: self.lattice("shots")?,
                    nodes: self.lattice("nodes")?,
                },
                GeometryKind::Circular => Layout::Circular {
                    shots: self.circular()?,
                    nodes: self.lattice("nodes")?,
                },
            };
            GeometrySource::Synthesize(layout)
        };

        Ok(GeometryConfig {
            kind,
            reciprocity: self.get_bool_or("reciprocity", false)?,
            source,
            shots_file: PathBuf::from(self.required("shots_file")?),
            nodes_file: PathBuf::from(self.required("nodes_file")?),
            relational_file: self.raw("relational").map(PathBuf::from),
        })
    }

    /// Forward-modeling section.
    pub fn modeling(&self) -> Result<ModelingConfig> {
        let defaults = FimConfig::default();
        let fim = FimConfig {
            tolerance: self.get_or("fim_tolerance", defaults.tolerance)?,
            tile_size: self.get_or("fim_tile_size", defaults.tile_size)?,
            max_local_iters: self.get_or("fim_max_local_iters", defaults.max_local_iters)?,
            max_tile_pops: self.get_opt("fim_max_tile_pops")?,
        };
        if fim.max_local_iters == 0 {
            return Err(invalid("fim_max_local_iters", "must be >= 1"));
        }
        Ok(ModelingConfig {
            vp_model_file: PathBuf::from(self.required("vp_model_file")?),
            fim,
            threads: self.get_opt("threads")?,
            export_receiver_output: self.get_bool_or("export_receiver_output", true)?,
            receiver_output_folder: self.path_or("receiver_output_folder", "outputs"),
            receiver_output_prefix: self
                .raw("receiver_output_prefix")
                .unwrap_or(DEFAULT_DATA_PREFIX)
                .to_string(),
            export_wavefield_output: self.get_bool_or("export_wavefield_output", false)?,
            wavefield_output_folder: self.path_or("wavefield_output_folder", "outputs"),
            runtime_log_file: self.raw("runtime_log_file").map(PathBuf::from),
        })
    }

    /// Inversion section.
    pub fn inversion(&self) -> Result<InversionConfig> {
        let code: i64 = self.get("inversion_type")?;
        let kind = InversionKind::from_code(code)
            .ok_or_else(|| invalid("inversion_type", format!("unknown inversion code {}", code)))?;

        let max_slowness_variation: f64 = self.get("max_slowness_variation")?;
        if !max_slowness_variation.is_finite() || max_slowness_variation <= 0.0 {
            return Err(invalid("max_slowness_variation", "must be positive"));
        }

        let smoothing = if self.get_bool_or("smooth_per_iteration", false)? {
            let samples: usize = self.get("gaussian_filter_samples")?;
            let stdv: f64 = self.get("gaussian_filter_stdv")?;
            Some(GaussianSmoother::new(samples, stdv)?)
        } else {
            None
        };

        let min_velocity: Option<f64> = self.get_opt("min_velocity")?;
        let max_velocity: Option<f64> = self.get_opt("max_velocity")?;
        let bounds = match (min_velocity, max_velocity) {
            (None, None) => None,
            (min_v, max_v) => Some(SlownessBounds::from_velocities(min_v, max_v)?),
        };

        Ok(InversionConfig {
            kind,
            max_iteration: self.get("max_iteration")?,
            max_slowness_variation,
            obs_data_folder: PathBuf::from(self.required("obs_data_folder")?),
            obs_data_prefix: self
                .raw("obs_data_prefix")
                .unwrap_or(DEFAULT_DATA_PREFIX)
                .to_string(),
            smoothing,
            convergence_folder: self.path_or("convergence_folder", "outputs"),
            estimated_model_folder: self.path_or("estimated_model_folder", "outputs"),
            export_model_per_iteration: self.get_bool_or("export_model_per_iteration", false)?,
            bounds,
        })
    }
}

/// Forward-modeling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelingConfig {
    /// Initial P-velocity model (`.bin` or `.npy`).
    pub vp_model_file: PathBuf,
    /// Eikonal solver tunables.
    pub fim: FimConfig,
    /// Worker threads; `None` uses every core.
    pub threads: Option<usize>,
    /// Write per-shot receiver travel times.
    pub export_receiver_output: bool,
    /// Directory for receiver travel times.
    pub receiver_output_folder: PathBuf,
    /// File prefix for receiver travel times, followed by the 1-based shot.
    pub receiver_output_prefix: String,
    /// Write per-shot travel-time volumes.
    pub export_wavefield_output: bool,
    /// Directory for travel-time volumes.
    pub wavefield_output_folder: PathBuf,
    /// Append a runtime block to this file after the run.
    pub runtime_log_file: Option<PathBuf>,
}

/// Inversion-loop parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InversionConfig {
    /// Gradient formulation.
    pub kind: InversionKind,
    /// Last iteration index; the loop performs `max_iteration + 1` checks.
    pub max_iteration: usize,
    /// Cap on the absolute slowness change per iteration.
    pub max_slowness_variation: f64,
    /// Directory holding observed travel times.
    pub obs_data_folder: PathBuf,
    /// File prefix of observed travel times, followed by the 1-based shot.
    pub obs_data_prefix: String,
    /// Gaussian regularization of each step, if enabled.
    pub smoothing: Option<GaussianSmoother>,
    /// Directory for the convergence curve.
    pub convergence_folder: PathBuf,
    /// Directory for model snapshots and the final model.
    pub estimated_model_folder: PathBuf,
    /// Write a model snapshot after every update.
    pub export_model_per_iteration: bool,
    /// Clamp on updated slowness.
    pub bounds: Option<SlownessBounds>,
}
