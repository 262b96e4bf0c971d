// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ndarray::ArrayD;

use crate::error::{Result, TomographyError};
use crate::geometry::CoordinateSet;
use crate::grid::Grid;

/// Supported volume file formats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    /// Headerless little-endian f32, depth fastest.
    Bin,
    /// NumPy .npy format, shape `[ny, nx, nz]`.
    Npy,
}

/// Infer file format from extension.
pub fn infer_format(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("bin") => Ok(FileFormat::Bin),
        Some("npy") => Ok(FileFormat::Npy),
        Some(ext) => Err(TomographyError::UnsupportedFileFormat(ext.to_string())),
        None => Err(TomographyError::UnsupportedFileFormat(
            "(no extension)".to_string(),
        )),
    }
}

/// Write values as headerless little-endian f32.
pub fn write_binary_f32(path: &Path, data: &[f64]) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    for &val in data {
        w.write_all(&(val as f32).to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

/// Read `expected_len` little-endian f32 values.
pub fn read_binary_f32(path: &Path, expected_len: usize) -> Result<Vec<f64>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() != expected_len * 4 {
        return Err(TomographyError::ShapeMismatch {
            expected: vec![expected_len],
            got: vec![bytes.len() / 4],
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
        .collect())
}

/// Load a volume from a .npy file.
pub fn load_npy_volume(path: &Path, expected_shape: &[usize]) -> Result<Vec<f64>> {
    let arr: ArrayD<f64> = match ndarray_npy::read_npy(path) {
        Ok(a) => a,
        Err(_) => {
            let arr32: ArrayD<f32> = ndarray_npy::read_npy(path)
                .map_err(|e| TomographyError::UnsupportedDtype(format!("{}", e)))?;
            arr32.mapv(|v| v as f64)
        }
    };

    let got_shape: Vec<usize> = arr.shape().to_vec();
    if got_shape != expected_shape {
        return Err(TomographyError::ShapeMismatch {
            expected: expected_shape.to_vec(),
            got: got_shape,
        });
    }

    // Fortran-order files would otherwise come back column-major.
    Ok(arr.as_standard_layout().iter().copied().collect())
}

/// Convert velocity field to slowness (element-wise 1/v).
pub fn velocity_to_slowness(velocity: &[f64]) -> Result<Vec<f64>> {
    let mut slowness = Vec::with_capacity(velocity.len());
    for (index, &v) in velocity.iter().enumerate() {
        if !v.is_finite() || v <= 0.0 {
            return Err(TomographyError::InvalidVelocity { index, value: v });
        }
        slowness.push(1.0 / v);
    }
    Ok(slowness)
}

/// Convert slowness back to velocity for export.
pub fn slowness_to_velocity(slowness: &[f64]) -> Vec<f64> {
    slowness.iter().map(|s| 1.0 / s).collect()
}

/// Load a physical-size velocity model and return it as slowness.
pub fn load_velocity_as_slowness(path: &Path, grid: &Grid) -> Result<Vec<f64>> {
    let velocity = match infer_format(path)? {
        FileFormat::Bin => read_binary_f32(path, grid.n_points())?,
        FileFormat::Npy => load_npy_volume(path, &[grid.ny(), grid.nx(), grid.nz()])?,
    };
    velocity_to_slowness(&velocity)
}

/// File name of a physical volume, tagged `<nz>x<nx>x<ny>`.
pub fn volume_file_name(prefix: &str, grid: &Grid) -> String {
    format!("{}_{}x{}x{}.bin", prefix, grid.nz(), grid.nx(), grid.ny())
}

fn parse_fields<T: FromStr>(path: &Path, line_no: usize, line: &str, count: usize) -> Result<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != count {
        return Err(TomographyError::MalformedFile {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("expected {} fields, found {}", count, fields.len()),
        });
    }
    fields
        .iter()
        .map(|f| {
            f.parse::<T>().map_err(|e| TomographyError::MalformedFile {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("'{}': {}", f, e),
            })
        })
        .collect()
}

fn data_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push((i + 1, trimmed.to_string()));
    }
    Ok(lines)
}

/// Read a coordinate file: one `x, y, z` point per line.
pub fn read_coordinates(path: &Path) -> Result<CoordinateSet> {
    let mut points = Vec::new();
    for (line_no, line) in data_lines(path)? {
        let p: Vec<f64> = parse_fields(path, line_no, &line, 3)?;
        points.push([p[0], p[1], p[2]]);
    }
    Ok(CoordinateSet::from_points(&points))
}

/// Write a coordinate file readable by [`read_coordinates`].
pub fn write_coordinates(path: &Path, set: &CoordinateSet) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for [x, y, z] in set.points() {
        writeln!(w, "{}, {}, {}", x, y, z)?;
    }
    w.flush()?;
    Ok(())
}

/// Read a relational file: one `begin, end` pair per shot.
pub fn read_ranges(path: &Path) -> Result<Vec<Range<usize>>> {
    let mut ranges = Vec::new();
    for (line_no, line) in data_lines(path)? {
        let r: Vec<usize> = parse_fields(path, line_no, &line, 2)?;
        ranges.push(r[0]..r[1]);
    }
    Ok(ranges)
}

/// Write a relational file readable by [`read_ranges`].
pub fn write_ranges(path: &Path, ranges: &[Range<usize>]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for r in ranges {
        writeln!(w, "{}, {}", r.start, r.end)?;
    }
    w.flush()?;
    Ok(())
}

/// Write one residual per line.
pub fn write_residuals(path: &Path, residuals: &[f64]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for r in residuals {
        writeln!(w, "{}", r)?;
    }
    w.flush()?;
    Ok(())
}

/// Peak resident memory of this process in megabytes, or 0 where the
/// platform does not expose it.
pub fn peak_ram_mb() -> usize {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|l| l.starts_with("VmHWM:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<usize>().ok())
        })
        .map(|kb| kb / 1024)
        .unwrap_or(0)
}

/// Append one runtime block to a log file.
pub fn append_runtime_log(
    path: &Path,
    elapsed: Duration,
    ram_mb: usize,
    device_mb: usize,
) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "------------------------------")?;
    writeln!(w, "Run time: {:.3} s", elapsed.as_secs_f64())?;
    writeln!(w, "RAM usage: {} MB", ram_mb)?;
    writeln!(w, "Device memory usage: {} MB", device_mb)?;
    writeln!(w, "------------------------------")?;
    w.flush()?;
    Ok(())
}
