// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Compute-device abstraction used by the forward and adjoint solvers.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::error::{Result, TomographyError};

/// A buffer resident on a compute device.
#[derive(Debug, Default)]
pub struct DeviceBuffer {
    data: Vec<f64>,
}

impl DeviceBuffer {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access for kernels running on the device.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Write access for kernels running on the device.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    fn bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }
}

/// Allocate / copy-in / copy-out / synchronize capability.
///
/// Work is submitted through [`ComputeDevice::run`]; data-parallel kernels
/// inside the task use the device's execution resources.
pub trait ComputeDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Allocate a zeroed buffer of `len` elements.
    fn allocate(&self, len: usize) -> DeviceBuffer;

    /// Return a buffer's memory to the device.
    fn release(&self, buffer: DeviceBuffer);

    /// Copy host data into a device buffer of the same length.
    fn copy_in(&self, buffer: &mut DeviceBuffer, host: &[f64]) -> Result<()>;

    /// Copy a device buffer into host memory of the same length.
    fn copy_out(&self, buffer: &DeviceBuffer, host: &mut [f64]) -> Result<()>;

    /// Block until all submitted work has completed.
    fn synchronize(&self);

    /// Memory currently held in device buffers, in megabytes.
    fn memory_usage_mb(&self) -> usize;

    /// Execute `task` on the device.
    fn run(&self, task: &mut (dyn FnMut() + Send));
}

/// Host CPU device backed by a dedicated rayon thread pool.
pub struct CpuDevice {
    pool: rayon::ThreadPool,
    allocated: AtomicUsize,
}

impl CpuDevice {
    /// Create a device with `threads` workers; `None` uses all available cores.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            if n == 0 {
                return Err(TomographyError::InvalidParameter {
                    key: "threads".to_string(),
                    reason: "must be >= 1".to_string(),
                });
            }
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| TomographyError::Other(e.to_string()))?;
        debug!(threads = pool.current_num_threads(), "cpu device ready");
        Ok(CpuDevice {
            pool,
            allocated: AtomicUsize::new(0),
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn check_len(buffer: &DeviceBuffer, host_len: usize) -> Result<()> {
        if buffer.len() != host_len {
            return Err(TomographyError::ShapeMismatch {
                expected: vec![buffer.len()],
                got: vec![host_len],
            });
        }
        Ok(())
    }
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn allocate(&self, len: usize) -> DeviceBuffer {
        let buffer = DeviceBuffer {
            data: vec![0.0; len],
        };
        self.allocated.fetch_add(buffer.bytes(), Ordering::Relaxed);
        buffer
    }

    fn release(&self, buffer: DeviceBuffer) {
        self.allocated.fetch_sub(buffer.bytes(), Ordering::Relaxed);
    }

    fn copy_in(&self, buffer: &mut DeviceBuffer, host: &[f64]) -> Result<()> {
        Self::check_len(buffer, host.len())?;
        buffer.data.copy_from_slice(host);
        Ok(())
    }

    fn copy_out(&self, buffer: &DeviceBuffer, host: &mut [f64]) -> Result<()> {
        Self::check_len(buffer, host.len())?;
        host.copy_from_slice(&buffer.data);
        Ok(())
    }

    // `run` blocks until the pool returns, so there is never outstanding work.
    fn synchronize(&self) {}

    fn memory_usage_mb(&self) -> usize {
        self.allocated.load(Ordering::Relaxed) / (1024 * 1024)
    }

    fn run(&self, task: &mut (dyn FnMut() + Send)) {
        self.pool.install(task)
    }
}
