//! Backend plugin exporting a scalar vector backend and the CPU geo backend.

use std::sync::Arc;

use strata_accel_core::{BackendType, GeoBackend, VectorBackend};
use strata_accel_cpu::{CpuGeoBackend, ScalarVectorBackend};
use strata_accel_plugin::{export_backend_plugin, BackendPlugin};

pub struct SamplePlugin;

impl BackendPlugin for SamplePlugin {
    fn plugin_name(&self) -> &str {
        "sample"
    }

    fn plugin_version(&self) -> &str {
        "0.4.2"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn create_vector_backend(&self) -> Option<Arc<dyn VectorBackend>> {
        Some(Arc::new(ScalarVectorBackend::new()))
    }

    fn create_geo_backend(&self) -> Option<Arc<dyn GeoBackend>> {
        Some(Arc::new(CpuGeoBackend::new()))
    }
}

export_backend_plugin!(SamplePlugin);
