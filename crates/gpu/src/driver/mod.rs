//! Vector backend over a CUDA-style driver API.
//!
//! CUDA, HIP and ZLUDA share this engine. A [`DriverFlavor`] names the driver
//! library, its symbol table and the runtime compiler that turns
//! [`kernels::CUDA_SOURCE`](crate::kernels::CUDA_SOURCE) into a loadable image.
//! Nothing links against a vendor SDK; a missing driver only means the backend
//! reports itself unavailable.

pub mod ffi;
pub mod rtc;

use std::ffi::{c_void, CString};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use strata_accel_core::kernels::select_k_nearest;
use strata_accel_core::validate::{self, BatchShape};
use strata_accel_core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    DistanceMetric, DynLib, KnnResults, Lifecycle, VectorBackend,
};

use crate::kernels::{self, div_ceil, BLOCK};
use crate::probe::{DeviceInfo, ProbeReport};
use ffi::{DriverApi, DriverSymbols, DrvContext, DrvDevicePtr, DrvFunction, DrvModule, DrvStream};
use rtc::CompilerSymbols;

/// Largest grid y-dimension every supported driver accepts.
const MAX_GRID_Y: usize = 65_535;

/// One vendor's way of reaching the device.
#[derive(Debug)]
pub struct DriverFlavor {
    /// Registry type of backends built on this flavor
    pub backend_type: BackendType,
    /// Backend name
    pub name: &'static str,
    /// Driver library candidates, most specific first
    pub libraries: fn() -> Vec<CString>,
    /// Driver entry points
    pub symbols: &'static DriverSymbols,
    /// Runtime compiler for the distance kernels
    pub compiler: &'static CompilerSymbols,
}

/// Live probe of one flavor: driver present, devices listed, compiler present.
pub fn probe_flavor(flavor: &DriverFlavor) -> ProbeReport {
    let api = match DriverApi::load(&(flavor.libraries)(), flavor.symbols) {
        Ok(api) => api,
        Err(e) => return ProbeReport::absent(flavor.backend_type, e),
    };
    let count = match api.device_count() {
        Ok(n) => n,
        Err(e) => {
            return ProbeReport::found(flavor.backend_type, api.library_name(), Vec::new())
                .with_detail(e)
        }
    };
    let devices: Vec<String> = (0..count)
        .filter_map(|i| api.device(i).and_then(|d| api.device_info(d)).ok())
        .map(|info| info.name)
        .collect();

    let report = ProbeReport::found(flavor.backend_type, api.library_name(), devices);
    let report = match DynLib::open_first(flavor.compiler.libraries) {
        Ok(_) => report.with_pipeline(),
        Err(e) => report.with_detail(format!("{} not available: {}", flavor.compiler.label, e)),
    };
    tracing::debug!(
        target: "strata::accel::gpu",
        backend = flavor.name,
        runtime = ?report.runtime,
        devices = report.devices.len(),
        usable = report.is_usable(),
        "driver probe"
    );
    report
}

/// RAII device allocation holding `len` f32 values.
struct DeviceBuffer {
    ptr: DrvDevicePtr,
    len: usize,
    api: Arc<DriverApi>,
}

impl DeviceBuffer {
    fn alloc(api: &Arc<DriverApi>, len: usize) -> Result<Self, String> {
        let ptr = api.mem_alloc(len * std::mem::size_of::<f32>())?;
        Ok(Self {
            ptr,
            len,
            api: Arc::clone(api),
        })
    }

    fn upload(api: &Arc<DriverApi>, data: &[f32]) -> Result<Self, String> {
        let buf = Self::alloc(api, data.len())?;
        api.memcpy_htod(
            buf.ptr,
            data.as_ptr() as *const c_void,
            std::mem::size_of_val(data),
        )?;
        Ok(buf)
    }

    fn download_into(&self, out: &mut [f32]) -> Result<(), String> {
        if out.len() != self.len {
            return Err(format!(
                "download of {} floats into a buffer of {}",
                self.len,
                out.len()
            ));
        }
        self.api.memcpy_dtoh(
            out.as_mut_ptr() as *mut c_void,
            self.ptr,
            std::mem::size_of_val(out),
        )
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.ptr != 0 {
            if let Err(e) = self.api.mem_free(self.ptr) {
                tracing::warn!(target: "strata::accel::gpu", error = %e, "failed to free device memory");
            }
        }
    }
}

/// Context, stream and compiled module on device 0.
struct Session {
    api: Arc<DriverApi>,
    ctx: DrvContext,
    stream: DrvStream,
    module: DrvModule,
    fn_l2: DrvFunction,
    fn_cosine: DrvFunction,
    device: DeviceInfo,
}

// SAFETY: the handles are process-global driver objects. Every use goes
// through the backend's session mutex and rebinds the context first.
unsafe impl Send for Session {}

impl Session {
    fn open(flavor: &DriverFlavor) -> Result<Self, String> {
        let api = Arc::new(DriverApi::load(&(flavor.libraries)(), flavor.symbols)?);
        if api.device_count()? == 0 {
            return Err(format!("{}: no devices", api.vendor()));
        }
        let device = api.device(0)?;
        let info = api.device_info(device)?;
        let image = rtc::compile(flavor.compiler, kernels::CUDA_SOURCE, "strata_accel_distance.cu", &[])?;

        let ctx = api.ctx_create(device)?;
        // Filled in step by step so Drop releases whatever was created.
        let mut session = Self {
            api,
            ctx,
            stream: std::ptr::null_mut(),
            module: std::ptr::null_mut(),
            fn_l2: std::ptr::null_mut(),
            fn_cosine: std::ptr::null_mut(),
            device: info,
        };
        session.stream = session.api.stream_create()?;
        session.module = session.api.module_load_data(&image)?;
        session.fn_l2 = session
            .api
            .module_get_function(session.module, &kernel_name(kernels::L2_KERNEL)?)?;
        session.fn_cosine = session
            .api
            .module_get_function(session.module, &kernel_name(kernels::COSINE_KERNEL)?)?;
        Ok(session)
    }

    fn distance_matrix(
        &self,
        queries: &[f32],
        vectors: &[f32],
        shape: BatchShape,
        metric: DistanceMetric,
    ) -> Result<Vec<f32>, String> {
        self.api.ctx_set_current(self.ctx)?;
        let func = match metric {
            DistanceMetric::L2 => self.fn_l2,
            DistanceMetric::Cosine => self.fn_cosine,
        };
        let mut num_vectors = shape.num_vectors as u32;
        let mut dim =
            u32::try_from(shape.dim).map_err(|_| format!("dimension {} too large", shape.dim))?;

        let d_vectors = DeviceBuffer::upload(&self.api, vectors)?;
        let mut out = vec![0.0f32; shape.matrix_len()];
        let rows_per_launch = MAX_GRID_Y * BLOCK as usize;

        for (q_chunk, out_chunk) in queries
            .chunks(rows_per_launch * shape.dim)
            .zip(out.chunks_mut(rows_per_launch * shape.num_vectors))
        {
            let d_queries = DeviceBuffer::upload(&self.api, q_chunk)?;
            let d_out = DeviceBuffer::alloc(&self.api, out_chunk.len())?;

            let mut q_ptr = d_queries.ptr;
            let mut v_ptr = d_vectors.ptr;
            let mut o_ptr = d_out.ptr;
            let mut num_queries = (q_chunk.len() / shape.dim) as u32;
            let mut params: [*mut c_void; 6] = [
                &mut q_ptr as *mut DrvDevicePtr as *mut c_void,
                &mut v_ptr as *mut DrvDevicePtr as *mut c_void,
                &mut o_ptr as *mut DrvDevicePtr as *mut c_void,
                &mut num_queries as *mut u32 as *mut c_void,
                &mut num_vectors as *mut u32 as *mut c_void,
                &mut dim as *mut u32 as *mut c_void,
            ];
            let grid = (div_ceil(num_vectors, BLOCK), div_ceil(num_queries, BLOCK), 1);
            // SAFETY: params match the kernel signature (three device
            // pointers, three u32) and outlive the synchronize below.
            unsafe {
                self.api
                    .launch_kernel(func, grid, (BLOCK, BLOCK, 1), self.stream, params.as_mut_ptr())?;
            }
            self.api.stream_synchronize(self.stream)?;
            d_out.download_into(out_chunk)?;
        }
        Ok(out)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.api.ctx_set_current(self.ctx);
        if !self.module.is_null() {
            if let Err(e) = self.api.module_unload(self.module) {
                tracing::warn!(target: "strata::accel::gpu", error = %e, "failed to unload module");
            }
        }
        if !self.stream.is_null() {
            if let Err(e) = self.api.stream_destroy(self.stream) {
                tracing::warn!(target: "strata::accel::gpu", error = %e, "failed to destroy stream");
            }
        }
        if let Err(e) = self.api.ctx_destroy(self.ctx) {
            tracing::warn!(target: "strata::accel::gpu", error = %e, "failed to destroy context");
        }
    }
}

fn kernel_name(name: &str) -> Result<CString, String> {
    CString::new(name).map_err(|_| format!("kernel name {:?} contains NUL", name))
}

/// Vector backend on a CUDA-style driver. Calls are serialized on one stream.
pub struct DriverVectorBackend {
    flavor: &'static DriverFlavor,
    lifecycle: Lifecycle,
    session: Mutex<Option<Session>>,
    probe: OnceCell<ProbeReport>,
}

impl std::fmt::Debug for DriverVectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverVectorBackend")
            .field("flavor", &self.flavor.name)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl DriverVectorBackend {
    /// Uninitialized backend for `flavor`. Nothing is loaded until
    /// [`probe`](Self::probe) or [`initialize`](ComputeBackend::initialize).
    pub fn new(flavor: &'static DriverFlavor) -> Self {
        Self {
            flavor,
            lifecycle: Lifecycle::new(),
            session: Mutex::new(None),
            probe: OnceCell::new(),
        }
    }

    /// Probe result, computed on first use and cached.
    pub fn probe(&self) -> &ProbeReport {
        self.probe.get_or_init(|| probe_flavor(self.flavor))
    }

    fn device_error(&self, message: String) -> AccelError {
        AccelError::device(self.flavor.name, message)
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
            .ok_or_else(|| AccelError::not_initialized(self.flavor.name))?;
        session
            .distance_matrix(queries, vectors, shape, metric)
            .map_err(|e| self.device_error(e))
    }
}

impl ComputeBackend for DriverVectorBackend {
    fn name(&self) -> &str {
        self.flavor.name
    }

    fn backend_type(&self) -> BackendType {
        self.flavor.backend_type
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
            .unwrap_or_else(|| format!("{} (no device)", self.flavor.name));
        BackendCapabilities::vector(device)
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| {
            let session = Session::open(self.flavor).map_err(|e| self.device_error(e))?;
            tracing::info!(
                target: "strata::accel::gpu",
                backend = self.flavor.name,
                device = %session.device.name,
                memory = session.device.total_memory,
                "driver backend initialized"
            );
            *self.session.lock() = Some(session);
            Ok(())
        })
    }

    fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {
            self.session.lock().take();
            tracing::debug!(target: "strata::accel::gpu", backend = self.flavor.name, "driver backend shut down");
        });
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl VectorBackend for DriverVectorBackend {
    fn compute_distances(
        &self,
        queries: &[f32],
        vectors: &[f32],
        dim: usize,
        metric: DistanceMetric,
    ) -> AccelResult<Vec<f32>> {
        self.lifecycle.ensure_initialized(self.name())?;
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
        self.lifecycle.ensure_initialized(self.name())?;
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
