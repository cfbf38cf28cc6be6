//! OpenCL vector backend.
//!
//! Picks the first GPU or accelerator device of any platform. CPU OpenCL
//! devices are skipped since the CPU family already covers them.

pub mod ffi;

use std::ffi::CString;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use strata_accel_core::kernels::select_k_nearest;
use strata_accel_core::validate::{self, BatchShape};
use strata_accel_core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    DistanceMetric, KnnResults, Lifecycle, VectorBackend,
};

use crate::kernels;
use crate::probe::{DeviceInfo, ProbeReport};
use ffi::{Context, Kernel, Mem, OpenClApi, Program, Queue};

const BACKEND: &str = "opencl";

/// Probe the ICD loader and list GPU/accelerator devices.
pub fn probe() -> ProbeReport {
    let api = match OpenClApi::load() {
        Ok(api) => api,
        Err(e) => return ProbeReport::absent(BackendType::OpenCl, e),
    };
    let devices = match api.compute_devices() {
        Ok(ids) => ids
            .into_iter()
            .filter_map(|d| api.device_info(d).ok())
            .map(|info| info.name)
            .collect(),
        Err(e) => {
            return ProbeReport::found(BackendType::OpenCl, api.library_name(), Vec::new())
                .with_detail(e)
        }
    };
    ProbeReport::found(BackendType::OpenCl, api.library_name(), devices).with_pipeline()
}

/// Device buffer released on drop.
struct ClBuffer {
    mem: Mem,
    api: Arc<OpenClApi>,
}

impl Drop for ClBuffer {
    fn drop(&mut self) {
        self.api.release_mem(self.mem);
    }
}

struct Session {
    api: Arc<OpenClApi>,
    ctx: Context,
    queue: Queue,
    program: Program,
    kernel_l2: Kernel,
    kernel_cosine: Kernel,
    device: DeviceInfo,
}

// SAFETY: OpenCL objects are reference-counted handles usable from any
// thread; kernel arguments are only set under the session mutex.
unsafe impl Send for Session {}

impl Session {
    fn open() -> Result<Self, String> {
        let api = Arc::new(OpenClApi::load()?);
        let device_id = *api
            .compute_devices()?
            .first()
            .ok_or_else(|| "no OpenCL GPU or accelerator device".to_string())?;
        let device = api.device_info(device_id)?;
        let ctx = api.create_context(device_id)?;
        let mut session = Self {
            api,
            ctx,
            queue: std::ptr::null_mut(),
            program: std::ptr::null_mut(),
            kernel_l2: std::ptr::null_mut(),
            kernel_cosine: std::ptr::null_mut(),
            device,
        };
        session.queue = session.api.create_queue(ctx, device_id)?;
        session.program = session
            .api
            .build_program(ctx, device_id, kernels::OPENCL_SOURCE)?;
        session.kernel_l2 = session.api.create_kernel(session.program, &entry(kernels::L2_KERNEL)?)?;
        session.kernel_cosine = session
            .api
            .create_kernel(session.program, &entry(kernels::COSINE_KERNEL)?)?;
        Ok(session)
    }

    fn distance_matrix(
        &self,
        queries: &[f32],
        vectors: &[f32],
        shape: BatchShape,
        metric: DistanceMetric,
    ) -> Result<Vec<f32>, String> {
        let kernel = match metric {
            DistanceMetric::L2 => self.kernel_l2,
            DistanceMetric::Cosine => self.kernel_cosine,
        };
        let buffer = |mem: Result<Mem, String>| {
            mem.map(|mem| ClBuffer {
                mem,
                api: Arc::clone(&self.api),
            })
        };
        let d_queries = buffer(self.api.buffer_from(self.ctx, queries))?;
        let d_vectors = buffer(self.api.buffer_from(self.ctx, vectors))?;
        let d_out = buffer(self.api.output_buffer(self.ctx, shape.matrix_len()))?;

        let num_queries = u32::try_from(shape.num_queries)
            .map_err(|_| format!("{} queries exceed one dispatch", shape.num_queries))?;
        let num_vectors = shape.num_vectors as u32;
        let dim = u32::try_from(shape.dim).map_err(|_| format!("dimension {} too large", shape.dim))?;

        self.api.set_arg(kernel, 0, &d_queries.mem)?;
        self.api.set_arg(kernel, 1, &d_vectors.mem)?;
        self.api.set_arg(kernel, 2, &d_out.mem)?;
        self.api.set_arg(kernel, 3, &num_queries)?;
        self.api.set_arg(kernel, 4, &num_vectors)?;
        self.api.set_arg(kernel, 5, &dim)?;
        self.api
            .enqueue_2d(self.queue, kernel, [shape.num_vectors, shape.num_queries])?;

        let mut out = vec![0.0f32; shape.matrix_len()];
        self.api.read(self.queue, d_out.mem, &mut out)?;
        self.api.finish(self.queue)?;
        Ok(out)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for kernel in [self.kernel_l2, self.kernel_cosine] {
            if !kernel.is_null() {
                self.api.release_kernel(kernel);
            }
        }
        if !self.program.is_null() {
            self.api.release_program(self.program);
        }
        if !self.queue.is_null() {
            self.api.release_queue(self.queue);
        }
        self.api.release_context(self.ctx);
    }
}

fn entry(name: &str) -> Result<CString, String> {
    CString::new(name).map_err(|_| format!("kernel name {:?} contains NUL", name))
}

/// Vector backend on the first OpenCL GPU or accelerator.
#[derive(Default)]
pub struct OpenClVectorBackend {
    lifecycle: Lifecycle,
    session: Mutex<Option<Session>>,
    probe: OnceCell<ProbeReport>,
}

impl std::fmt::Debug for OpenClVectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClVectorBackend")
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl OpenClVectorBackend {
    /// Uninitialized backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached probe result.
    pub fn probe(&self) -> &ProbeReport {
        self.probe.get_or_init(probe)
    }

    fn run_matrix(
        &self,
        queries: &[f32],
        vectors: &[f32],
        shape: BatchShape,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        let guard = self.session.lock();
        let session = guard
            .as_ref()
            .ok_or_else(|| AccelError::not_initialized(BACKEND))?;
        session
            .distance_matrix(queries, vectors, shape, metric)
            .map_err(|e| AccelError::device(BACKEND, e))
    }
}

impl ComputeBackend for OpenClVectorBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn backend_type(&self) -> BackendType {
        BackendType::OpenCl
    }

    fn is_available(&self) -> bool {
        self.lifecycle.is_initialized() || self.probe().is_usable()
    }

    fn capabilities(&self) -> BackendCapabilities {
        if let Some(session) = self.session.lock().as_ref() {
            return BackendCapabilities::vector(session.device.name.clone())
                .with_device(session.device.total_memory, session.device.compute_units);
        }
        let device = self
            .probe()
            .devices
            .first()
            .cloned()
            .unwrap_or_else(|| "opencl (no device)".to_string());
        BackendCapabilities::vector(device)
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| {
            let session = Session::open().map_err(|e| AccelError::device(BACKEND, e))?;
            tracing::info!(
                target: "strata::accel::gpu",
                backend = BACKEND,
                device = %session.device.name,
                compute_units = session.device.compute_units,
                "OpenCL backend initialized"
            );
            *self.session.lock() = Some(session);
            Ok(())
        })
    }

    fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {
            self.session.lock().take();
        });
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl VectorBackend for OpenClVectorBackend {
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        self.lifecycle.ensure_initialized(BACKEND)?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        if shape.matrix_len() == 0 {
            return Ok(Vec::new());
        }
        self.run_matrix(queries, vectors, shape, metric)
    }

    fn batch_knn_search(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        k: usize,
        metric: DistanceMetric,
    ) -> AccelResult<KnnResults> {
        self.lifecycle.ensure_initialized(BACKEND)?;
        let shape = validate::vector_batch(queries, vectors, dim)?;
        if shape.num_vectors == 0 || k == 0 {
            return Ok(vec![Vec::new(); shape.num_queries]);
        }
        let matrix = self.run_matrix(queries, vectors, shape, metric)?;
        Ok(matrix
            .chunks_exact(shape.num_vectors)
            .map(|row| select_k_nearest(row, k))
            .collect())
    }
}
