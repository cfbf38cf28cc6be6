//! Device failures surface as errors; the caller picks the next backend.

use std::sync::Arc;

use crate::common::*;

/// Run KNN on the best backend, retrying once on the CPU when the best
/// backend reports a device-level failure.
fn knn_with_cpu_retry(
    registry: &BackendRegistry,
    queries: &[f32],
    vectors: &[f32],
    dim: usize,
    k: usize,
) -> AccelResult<(BackendType, KnnResults)> {
    let best = registry.get_best_vector_backend().ok_or_else(|| AccelError::unavailable("no vector backend"))?;
    match best.batch_knn_search(queries, vectors, dim, k, DistanceMetric::L2) {
        Ok(results) => Ok((best.backend_type(), results)),
        Err(e) if e.is_fallback_condition() => {
            let cpu = registry
                .get_backend(BackendType::Cpu)
                .and_then(|h| h.as_vector().cloned())
                .ok_or(e)?;
            let results = cpu.batch_knn_search(queries, vectors, dim, k, DistanceMetric::L2)?;
            Ok((BackendType::Cpu, results))
        }
        Err(e) => Err(e),
    }
}

#[test]
fn registry_returns_failing_gpu_and_does_not_retry() {
    let registry = isolated_registry(cpu_only_config());
    assert!(registry.register_vector_backend(Arc::new(FlakyGpu::new(BackendType::Cuda))));

    let best = registry.get_best_vector_backend().unwrap();
    assert_eq!(best.backend_type(), BackendType::Cuda);

    let err = best
        .batch_knn_search(&[0.0; 4], &[1.0; 8], 4, 1, DistanceMetric::L2)
        .unwrap_err();
    assert!(matches!(err, AccelError::Device { .. }));
    assert!(err.is_fallback_condition());
}

#[test]
fn caller_falls_back_to_cpu() {
    let registry = isolated_registry(cpu_only_config());
    registry.register_vector_backend(Arc::new(FlakyGpu::new(BackendType::Vulkan)));

    let queries = random_vectors(1, 5, 16);
    let vectors = random_vectors(2, 50, 16);
    let (ran_on, results) = knn_with_cpu_retry(&registry, &queries, &vectors, 16, 3).unwrap();
    assert_eq!(ran_on, BackendType::Cpu);
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.len() == 3));
    for row in &results {
        assert!(row.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}

#[test]
fn invalid_input_is_not_retried() {
    let registry = isolated_registry(cpu_only_config());
    let err = knn_with_cpu_retry(&registry, &[1.0, 2.0], &[1.0; 8], 0, 1).unwrap_err();
    assert!(matches!(err, AccelError::InvalidInput(_)));
}

#[test]
fn shut_down_backend_reports_not_initialized() {
    let registry = isolated_registry(cpu_only_config());
    let backend = registry.get_best_vector_backend().unwrap();
    registry.shutdown_all();

    assert_eq!(backend.state(), BackendState::ShutDown);
    let err = backend
        .compute_distances(&[0.0; 4], &[0.0; 4], 4, DistanceMetric::L2)
        .unwrap_err();
    assert!(matches!(err, AccelError::NotInitialized { .. }));
    assert!(registry.get_best_vector_backend().is_none());
}
