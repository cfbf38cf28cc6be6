//! CPU geo backend: haversine / vincenty distances and point-in-polygon

use rayon::prelude::*;
use strata_accel_core::kernels::{haversine_km, point_in_polygon, vincenty_inverse_km};
use strata_accel_core::validate;
use strata_accel_core::{
    AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend, GeoBackend,
    GeoFormula, Lifecycle,
};

/// Points per task for distance batches.
pub const GEO_DISTANCE_GRAIN: usize = 256;

/// Points per task for containment batches.
pub const POINT_IN_POLYGON_GRAIN: usize = 64;

/// Geo kernels on the host CPU, serial or fanned out over rayon.
#[derive(Debug, Default)]
pub struct CpuGeoBackend {
    lifecycle: Lifecycle,
    parallel: bool,
}

impl CpuGeoBackend {
    /// Serial backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that splits batches across the rayon pool
    pub fn parallel() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            parallel: true,
        }
    }

    /// True when batches are split across threads
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }
}

/// Distance in km plus whether vincenty fell back to haversine.
fn distance_km(formula: GeoFormula, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f32, bool) {
    match formula {
        GeoFormula::Haversine => (haversine_km(lat1, lon1, lat2, lon2) as f32, false),
        GeoFormula::Vincenty => match vincenty_inverse_km(lat1, lon1, lat2, lon2) {
            Some(d) => (d as f32, false),
            None => (haversine_km(lat1, lon1, lat2, lon2) as f32, true),
        },
    }
}

impl ComputeBackend for CpuGeoBackend {
    fn name(&self) -> &str {
        if self.parallel {
            "cpu-geo-parallel"
        } else {
            "cpu-geo"
        }
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn is_available(&self) -> bool {
        true
    }

    fn capabilities(&self) -> BackendCapabilities {
        let units = if self.parallel {
            rayon::current_num_threads() as u32
        } else {
            1
        };
        BackendCapabilities::geo("CPU").with_device(0, units)
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| Ok(()))
    }

    fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {});
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl GeoBackend for CpuGeoBackend {
    fn batch_distances(
        &self,
        lat1: &[f64],
        lon1: &[f64],
        lat2: &[f64],
        lon2: &[f64],
        formula: GeoFormula,
    ) -> AccelResult<Vec<f32>> {
        self.lifecycle.ensure_initialized(self.name())?;
        let n = validate::geo_pairs(lat1, lon1, lat2, lon2)?;
        let pair = |i: usize| distance_km(formula, lat1[i], lon1[i], lat2[i], lon2[i]);

        let results: Vec<(f32, bool)> = if self.parallel {
            (0..n)
                .into_par_iter()
                .with_min_len(GEO_DISTANCE_GRAIN)
                .map(pair)
                .collect()
        } else {
            (0..n).map(pair).collect()
        };

        let degraded = results.iter().filter(|(_, d)| *d).count();
        if degraded > 0 {
            tracing::debug!(
                target: "strata::accel::cpu",
                degraded,
                total = n,
                "Vincenty did not converge for nearly antipodal points; used haversine"
            );
        }
        Ok(results.into_iter().map(|(d, _)| d).collect())
    }

    fn batch_point_in_polygon(
        &self,
        lats: &[f64],
        lons: &[f64],
        polygon: &[f64],
    ) -> AccelResult<Vec<bool>> {
        self.lifecycle.ensure_initialized(self.name())?;
        let n = validate::polygon_query(lats, lons, polygon)?;
        let test = |i: usize| point_in_polygon(lats[i], lons[i], polygon);
        Ok(if self.parallel {
            (0..n)
                .into_par_iter()
                .with_min_len(POINT_IN_POLYGON_GRAIN)
                .map(test)
                .collect()
        } else {
            (0..n).map(test).collect()
        })
    }
}
