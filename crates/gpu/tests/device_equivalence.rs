//! GPU results against the scalar reference.
//!
//! Runs against whatever devices the machine has. Backends whose runtime is
//! missing are skipped, so the suite passes on hosts without a GPU.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_accel_core::kernels::{distance, select_k_nearest};
use strata_accel_core::DistanceMetric;
use strata_accel_gpu::gpu_vector_backends;

fn random_rows(rng: &mut StdRng, rows: usize, dim: usize) -> Vec<f32> {
    (0..rows * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn reference(queries: &[f32], vectors: &[f32], dim: usize, metric: DistanceMetric) -> Vec<f32> {
    queries
        .chunks_exact(dim)
        .flat_map(|q| vectors.chunks_exact(dim).map(move |v| distance(metric, q, v)))
        .collect()
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-4 * a.abs().max(b.abs()).max(1.0)
}

#[test]
fn test_available_gpu_backends_match_reference() {
    let mut rng = StdRng::seed_from_u64(7);
    let dim = 37;
    let queries = random_rows(&mut rng, 19, dim);
    let vectors = random_rows(&mut rng, 301, dim);

    for backend in gpu_vector_backends() {
        if !backend.is_available() || backend.initialize().is_err() {
            eprintln!("skipping {}: not available", backend.name());
            continue;
        }
        for metric in [DistanceMetric::L2, DistanceMetric::Cosine] {
            let expected = reference(&queries, &vectors, dim, metric);
            let got = backend
                .compute_distances(&queries, &vectors, dim, metric)
                .unwrap();
            assert_eq!(got.len(), expected.len());
            for (i, (g, e)) in got.iter().zip(&expected).enumerate() {
                assert!(close(*g, *e), "{} {:?} cell {}: {} vs {}", backend.name(), metric, i, g, e);
            }

            let knn = backend
                .batch_knn_search(&queries, &vectors, dim, 5, metric)
                .unwrap();
            for (row, hits) in expected.chunks_exact(301).zip(&knn) {
                let want = select_k_nearest(row, 5);
                assert_eq!(hits.len(), want.len());
                for (h, w) in hits.iter().zip(&want) {
                    assert!(close(h.1, w.1));
                }
            }
        }
        backend.shutdown();
    }
}

#[test]
fn test_zero_norm_cosine_is_max_distance_on_device() {
    for backend in gpu_vector_backends() {
        if !backend.is_available() || backend.initialize().is_err() {
            continue;
        }
        let d = backend
            .compute_distances(&[0.0, 0.0], &[1.0, 0.0], 2, DistanceMetric::Cosine)
            .unwrap();
        assert_eq!(d, vec![1.0]);
        backend.shutdown();
    }
}
