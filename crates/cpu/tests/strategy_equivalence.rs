//! Cross-strategy numerical equivalence
//!
//! Scalar, SIMD and thread-pool backends must agree with the scalar kernels
//! within 1e-4 relative error, and KNN results must be consistent with the
//! distance matrix of the same backend.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_accel_core::kernels;
use strata_accel_core::{ComputeBackend, DistanceMetric, VectorBackend};
use strata_accel_cpu::{
    ParallelSettings, ParallelVectorBackend, ScalarVectorBackend, SimdKernels,
    SimdVectorBackend,
};

const DIMS: [usize; 6] = [1, 3, 4, 8, 16, 129];
const REL_EPS: f32 = 1e-4;

fn random_rows(rng: &mut StdRng, rows: usize, dim: usize) -> Vec<f32> {
    (0..rows * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn backends() -> Vec<Box<dyn VectorBackend>> {
    let all: Vec<Box<dyn VectorBackend>> = vec![
        Box::new(ScalarVectorBackend::new()),
        Box::new(SimdVectorBackend::new()),
        Box::new(SimdVectorBackend::with_kernels(SimdKernels::scalar())),
        Box::new(ParallelVectorBackend::new(ParallelSettings {
            threads: 4,
            simd: true,
        })),
        Box::new(ParallelVectorBackend::new(ParallelSettings {
            threads: 2,
            simd: false,
        })),
    ];
    for b in &all {
        b.initialize().unwrap();
    }
    all
}

fn assert_rel_close(got: f32, want: f32, ctx: &str) {
    let tol = REL_EPS * want.abs().max(1.0);
    assert!((got - want).abs() <= tol, "{}: got {} want {}", ctx, got, want);
}

#[test]
fn distances_agree_with_scalar_reference() {
    let mut rng = StdRng::seed_from_u64(0x5eed_acce1);
    let backends = backends();
    for dim in DIMS {
        let queries = random_rows(&mut rng, 37, dim);
        let vectors = random_rows(&mut rng, 53, dim);
        for metric in [DistanceMetric::L2, DistanceMetric::Cosine] {
            let reference: Vec<f32> = queries
                .chunks_exact(dim)
                .flat_map(|q| {
                    vectors
                        .chunks_exact(dim)
                        .map(move |v| kernels::distance(metric, q, v))
                })
                .collect();
            for backend in &backends {
                let got = backend
                    .compute_distances(&queries, &vectors, dim, metric)
                    .unwrap();
                assert_eq!(got.len(), reference.len());
                for (i, (g, r)) in got.iter().zip(reference.iter()).enumerate() {
                    let ctx = format!("{} dim={} {:?} cell={}", backend.name(), dim, metric, i);
                    assert_rel_close(*g, *r, &ctx);
                }
            }
        }
    }
}

#[test]
fn knn_is_sorted_subset_of_distance_row() {
    let mut rng = StdRng::seed_from_u64(42);
    for backend in backends() {
        for dim in DIMS {
            let queries = random_rows(&mut rng, 9, dim);
            let vectors = random_rows(&mut rng, 25, dim);
            for k in [1usize, 5, 25, 40] {
                let matrix = backend
                    .compute_distances(&queries, &vectors, dim, DistanceMetric::L2)
                    .unwrap();
                let knn = backend
                    .batch_knn_search(&queries, &vectors, dim, k, DistanceMetric::L2)
                    .unwrap();
                assert_eq!(knn.len(), 9);
                for (q, hits) in knn.iter().enumerate() {
                    assert_eq!(hits.len(), k.min(25));
                    let row = &matrix[q * 25..(q + 1) * 25];
                    for w in hits.windows(2) {
                        assert!(w[0].1 <= w[1].1, "{} not ascending", backend.name());
                    }
                    for (idx, d) in hits {
                        assert_eq!(row[*idx as usize], *d);
                    }
                    // Everything strictly closer than the last hit is itself a hit
                    let worst = hits.last().map(|h| h.1).unwrap_or(f32::INFINITY);
                    let closer = row.iter().filter(|d| **d < worst).count();
                    assert!(closer < hits.len());
                }
            }
        }
    }
}

#[test]
fn end_to_end_scenario() {
    let queries = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
    let vectors = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 2.0, 2.0, 2.0, 2.0];
    for backend in backends() {
        let res = backend
            .batch_knn_search(&queries, &vectors, 4, 2, DistanceMetric::from_use_l2(true))
            .unwrap();
        assert_eq!(res[0][0], (0, 0.0));
        assert_eq!(res[0][1].0, 1);
        assert!((res[0][1].1 - 3.0f32.sqrt()).abs() < 1e-5, "{}", res[0][1].1);
        assert_eq!(res[1], vec![(1, 1.0), (0, 2.0)]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_knn_length_is_min_k_n(
        n in 0usize..40,
        k in 0usize..50,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let dim = 8;
        let queries = random_rows(&mut rng, 3, dim);
        let vectors = random_rows(&mut rng, n, dim);
        let backend = ParallelVectorBackend::default();
        backend.initialize().unwrap();
        let res = backend
            .batch_knn_search(&queries, &vectors, dim, k, DistanceMetric::Cosine)
            .unwrap();
        prop_assert_eq!(res.len(), 3);
        for hits in res {
            prop_assert_eq!(hits.len(), k.min(n));
        }
    }
}
