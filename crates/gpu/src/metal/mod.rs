//! Apple Metal vector backend.
//!
//! Compiles the MSL distance kernels with `newLibraryWithSource:` on the
//! default system device and runs each batch as one command buffer over
//! shared-storage buffers.

pub mod ffi;
pub mod kernels;

use std::ffi::c_void;

use parking_lot::Mutex;
use strata_accel_core::kernels::select_k_nearest;
use strata_accel_core::validate::{self, BatchShape};
use strata_accel_core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    DistanceMetric, KnnResults, Lifecycle, VectorBackend,
};

use crate::kernels::{div_ceil, BLOCK};
use crate::probe::{DeviceInfo, ProbeReport};
use ffi::{msg_send, Id, NSUInteger, Selectors, MTL_RESOURCE_STORAGE_MODE_SHARED, NIL};
use kernels::DistanceParams;

const BACKEND: &str = "metal";

/// Probe for a default Metal device.
pub fn probe() -> ProbeReport {
    // SAFETY: the returned device is released before leaving the block.
    let name = unsafe {
        let device = ffi::MTLCreateSystemDefaultDevice();
        if device == NIL {
            return ProbeReport::absent(BackendType::Metal, "no Metal device");
        }
        let sels = Selectors::register();
        let name = ffi::rust_string(msg_send!(Id; device, sels.name));
        msg_send!((); device, sels.release);
        name
    };
    ProbeReport::found(BackendType::Metal, "Metal.framework", vec![name]).with_pipeline()
}

/// Shared-storage `MTLBuffer`, released on drop.
struct MetalBuffer {
    buffer: Id,
    release: ffi::Sel,
}

impl Drop for MetalBuffer {
    fn drop(&mut self) {
        if self.buffer != NIL {
            unsafe { msg_send!((); self.buffer, self.release) };
        }
    }
}

/// Device, queue and pipelines.
struct Session {
    device: Id,
    queue: Id,
    pipelines: [Id; 2],
    sels: Selectors,
    info: DeviceInfo,
}

// SAFETY: Metal device, queue and pipeline objects are thread-safe; all
// encoding happens under the backend's session mutex.
unsafe impl Send for Session {}

impl Session {
    unsafe fn open() -> Result<Self, String> {
        let device = ffi::MTLCreateSystemDefaultDevice();
        if device == NIL {
            return Err("no Metal device available".into());
        }
        let sels = Selectors::register();
        let info = DeviceInfo {
            name: ffi::rust_string(msg_send!(Id; device, sels.name)),
            total_memory: msg_send!(u64; device, sels.recommended_max_working_set_size),
            compute_units: 0,
        };
        let mut session = Self {
            device,
            queue: NIL,
            pipelines: [NIL; 2],
            sels,
            info,
        };

        session.queue = msg_send!(Id; device, session.sels.new_command_queue);
        if session.queue == NIL {
            return Err("failed to create Metal command queue".into());
        }

        let source = ffi::ns_string(kernels::MSL_SOURCE)?;
        let mut error: Id = NIL;
        let library = msg_send!(Id; device, session.sels.new_library_with_source,
            source => Id, NIL => Id, &mut error as *mut Id => *mut Id);
        if library == NIL {
            return Err(format!("MSL compile error: {}", ffi::describe(error)));
        }

        let built = session.build_pipelines(library);
        msg_send!((); library, session.sels.release);
        built?;
        Ok(session)
    }

    unsafe fn build_pipelines(&mut self, library: Id) -> Result<(), String> {
        for (slot, name) in kernels::KERNELS.iter().enumerate() {
            let func = msg_send!(Id; library, self.sels.new_function_with_name, ffi::ns_string(name)? => Id);
            if func == NIL {
                return Err(format!("kernel {} missing from MSL library", name));
            }
            let mut error: Id = NIL;
            let pso = msg_send!(Id; self.device, self.sels.new_compute_pipeline,
                func => Id, &mut error as *mut Id => *mut Id);
            msg_send!((); func, self.sels.release);
            if pso == NIL {
                return Err(format!("pipeline {}: {}", name, ffi::describe(error)));
            }
            self.pipelines[slot] = pso;
        }
        Ok(())
    }

    unsafe fn upload(&self, data: &[f32]) -> Result<MetalBuffer, String> {
        let buffer = msg_send!(Id; self.device, self.sels.new_buffer_with_bytes,
            data.as_ptr() as *const c_void => *const c_void,
            std::mem::size_of_val(data) => NSUInteger,
            MTL_RESOURCE_STORAGE_MODE_SHARED => NSUInteger);
        self.wrap(buffer, std::mem::size_of_val(data))
    }

    unsafe fn alloc(&self, len: usize) -> Result<MetalBuffer, String> {
        let bytes = len * std::mem::size_of::<f32>();
        let buffer = msg_send!(Id; self.device, self.sels.new_buffer_with_length,
            bytes => NSUInteger, MTL_RESOURCE_STORAGE_MODE_SHARED => NSUInteger);
        self.wrap(buffer, bytes)
    }

    fn wrap(&self, buffer: Id, bytes: usize) -> Result<MetalBuffer, String> {
        if buffer == NIL {
            return Err(format!("failed to allocate {} byte Metal buffer", bytes));
        }
        Ok(MetalBuffer {
            buffer,
            release: self.sels.release,
        })
    }

    unsafe fn distance_matrix(
        &self,
        queries: &[f32],
        vectors: &[f32],
        shape: BatchShape,
        metric: DistanceMetric,
    ) -> Result<Vec<f32>, String> {
        let pipeline = match metric {
            DistanceMetric::L2 => self.pipelines[0],
            DistanceMetric::Cosine => self.pipelines[1],
        };
        let params = DistanceParams {
            num_queries: shape.num_queries as u32,
            num_vectors: shape.num_vectors as u32,
            dim: u32::try_from(shape.dim).map_err(|_| format!("dimension {} too large", shape.dim))?,
        };
        if shape.num_queries > u32::MAX as usize {
            return Err(format!("{} queries exceed one dispatch", shape.num_queries));
        }

        let d_queries = self.upload(queries)?;
        let d_vectors = self.upload(vectors)?;
        let d_out = self.alloc(shape.matrix_len())?;

        let cmd = msg_send!(Id; self.queue, self.sels.command_buffer);
        let enc = msg_send!(Id; cmd, self.sels.compute_command_encoder);
        if cmd == NIL || enc == NIL {
            return Err("failed to open Metal command encoder".into());
        }
        msg_send!((); enc, self.sels.set_compute_pipeline, pipeline => Id);
        for (index, buf) in [&d_queries, &d_vectors, &d_out].into_iter().enumerate() {
            msg_send!((); enc, self.sels.set_buffer,
                buf.buffer => Id, 0 => NSUInteger, index => NSUInteger);
        }
        msg_send!((); enc, self.sels.set_bytes,
            &params as *const DistanceParams as *const c_void => *const c_void,
            std::mem::size_of::<DistanceParams>() => NSUInteger,
            3 => NSUInteger);
        let groups_x = div_ceil(params.num_vectors, BLOCK) as NSUInteger;
        let groups_y = div_ceil(params.num_queries, BLOCK) as NSUInteger;
        msg_send!((); enc, self.sels.dispatch_threadgroups,
            groups_x => NSUInteger, groups_y => NSUInteger, 1 => NSUInteger,
            BLOCK as NSUInteger => NSUInteger, BLOCK as NSUInteger => NSUInteger, 1 => NSUInteger);
        msg_send!((); enc, self.sels.end_encoding);
        msg_send!((); cmd, self.sels.commit);
        msg_send!((); cmd, self.sels.wait_until_completed);

        let ptr = msg_send!(*mut c_void; d_out.buffer, self.sels.contents) as *const f32;
        if ptr.is_null() {
            return Err("Metal output buffer has no contents".into());
        }
        Ok(std::slice::from_raw_parts(ptr, shape.matrix_len()).to_vec())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        unsafe {
            for pso in self.pipelines {
                if pso != NIL {
                    msg_send!((); pso, self.sels.release);
                }
            }
            if self.queue != NIL {
                msg_send!((); self.queue, self.sels.release);
            }
            msg_send!((); self.device, self.sels.release);
        }
    }
}

/// Vector backend on the default Metal device.
#[derive(Default)]
pub struct MetalVectorBackend {
    lifecycle: Lifecycle,
    session: Mutex<Option<Session>>,
    probe: once_cell::sync::OnceCell<ProbeReport>,
}

impl std::fmt::Debug for MetalVectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalVectorBackend")
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl MetalVectorBackend {
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
        unsafe { session.distance_matrix(queries, vectors, shape, metric) }
            .map_err(|e| AccelError::device(BACKEND, e))
    }
}

impl ComputeBackend for MetalVectorBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Metal
    }

    fn is_available(&self) -> bool {
        self.lifecycle.is_initialized() || self.probe().is_usable()
    }

    fn capabilities(&self) -> BackendCapabilities {
        if let Some(session) = self.session.lock().as_ref() {
            return BackendCapabilities::vector(session.info.name.clone())
                .with_device(session.info.total_memory, session.info.compute_units);
        }
        let device = self
            .probe()
            .devices
            .first()
            .cloned()
            .unwrap_or_else(|| "metal (no device)".to_string());
        BackendCapabilities::vector(device)
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| {
            let session = unsafe { Session::open() }.map_err(|e| AccelError::device(BACKEND, e))?;
            tracing::info!(target: "strata::accel::gpu", backend = BACKEND, device = %session.info.name, "Metal backend initialized");
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

impl VectorBackend for MetalVectorBackend {
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
