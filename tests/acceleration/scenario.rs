//! Batches routed through the registry's best backends.

use crate::common::*;
use proptest::prelude::*;
use strata_accel::cpu::{vector_backend, CpuOptions, CpuStrategy};

const DIM: usize = 4;

fn queries() -> Vec<f32> {
    vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]
}

fn candidates() -> Vec<f32> {
    vec![
        0.0, 0.0, 0.0, 0.0, //
        1.0, 1.0, 1.0, 0.0, //
        2.0, 2.0, 2.0, 2.0,
    ]
}

#[test]
fn knn_scenario_through_registry() {
    let registry = isolated_registry(cpu_only_config());
    let backend = registry.get_best_vector_backend().expect("cpu backend");

    let results = backend
        .batch_knn_search(&queries(), &candidates(), DIM, 2, DistanceMetric::L2)
        .unwrap();
    assert_eq!(results.len(), 2);

    let q0: Vec<u32> = results[0].iter().map(|n| n.0).collect();
    assert_eq!(q0, vec![0, 1]);
    assert_eq!(results[0][0].1, 0.0);
    assert!((results[0][1].1 - 3.0f32.sqrt()).abs() < 1e-5);

    // Candidates 0 and 2 are both at distance 2 from query 1: first seen wins.
    assert_eq!(results[1][0].0, 1);
    assert!((results[1][0].1 - 1.0).abs() < 1e-6);
    assert_eq!(results[1][1].0, 0);
    assert!((results[1][1].1 - 2.0).abs() < 1e-6);
}

#[test]
fn knn_scenario_identical_across_strategies() {
    let expected = isolated_registry(cpu_only_config())
        .get_best_vector_backend()
        .unwrap()
        .batch_knn_search(&queries(), &candidates(), DIM, 2, DistanceMetric::L2)
        .unwrap();

    for strategy in [CpuStrategy::Scalar, CpuStrategy::Simd, CpuStrategy::Parallel] {
        let backend = vector_backend(&CpuOptions {
            strategy,
            ..CpuOptions::default()
        });
        backend.initialize().unwrap();
        let got = backend
            .batch_knn_search(&queries(), &candidates(), DIM, 2, DistanceMetric::L2)
            .unwrap();
        let ids: Vec<Vec<u32>> = got.iter().map(|r| r.iter().map(|n| n.0).collect()).collect();
        let want: Vec<Vec<u32>> = expected.iter().map(|r| r.iter().map(|n| n.0).collect()).collect();
        assert_eq!(ids, want, "{:?}", strategy);
    }
}

#[test]
fn k_larger_than_candidates_returns_all() {
    let registry = isolated_registry(cpu_only_config());
    let backend = registry.get_best_vector_backend().unwrap();
    let results = backend
        .batch_knn_search(&queries(), &candidates(), DIM, 10, DistanceMetric::Cosine)
        .unwrap();
    assert!(results.iter().all(|r| r.len() == 3));
}

#[test]
fn random_batch_distance_matrix_shape() {
    let registry = isolated_registry(cpu_only_config());
    let backend = registry.get_best_vector_backend().unwrap();
    let queries = random_vectors(7, 33, 24);
    let vectors = random_vectors(8, 129, 24);

    let matrix = backend
        .compute_distances(&queries, &vectors, 24, DistanceMetric::L2)
        .unwrap();
    assert_eq!(matrix.len(), 33 * 129);
    assert!(matrix.iter().all(|d| d.is_finite() && *d >= 0.0));
}

#[test]
fn dimension_mismatch_is_invalid_input() {
    let registry = isolated_registry(cpu_only_config());
    let backend = registry.get_best_vector_backend().unwrap();
    let err = backend
        .compute_distances(&[1.0, 2.0, 3.0], &candidates(), DIM, DistanceMetric::L2)
        .unwrap_err();
    assert!(matches!(err, AccelError::InvalidInput(_)));
    assert!(!err.is_fallback_condition());
}

#[test]
fn graph_batches_through_registry() {
    let registry = isolated_registry(cpu_only_config());
    let backend = registry.get_best_graph_backend().expect("cpu graph backend");

    // 0 -> 1 -> 2 -> 3, plus 0 -> 2
    let offsets = [0, 2, 3, 4, 4];
    let targets = [1, 2, 2, 3];
    let graph = CsrGraph::new(&offsets, &targets);

    let reached = backend.batch_bfs(&graph, &[0, 3], 1).unwrap();
    assert_eq!(reached[0], vec![0, 1, 2]);
    assert_eq!(reached[1], vec![3]);

    let paths = backend.batch_shortest_path(&graph, &[0, 3], &[3, 0]).unwrap();
    assert_eq!(paths[0], vec![0, 2, 3]);
    assert!(paths[1].is_empty());
}

#[test]
fn geo_batches_through_registry() {
    let registry = isolated_registry(cpu_only_config());
    let backend = registry.get_best_geo_backend().expect("cpu geo backend");

    let london_paris = backend
        .batch_distances(&[51.5074], &[-0.1278], &[48.8566], &[2.3522], GeoFormula::Haversine)
        .unwrap();
    assert!((london_paris[0] - 343.5).abs() < 2.0, "{}", london_paris[0]);

    let vincenty = backend
        .batch_distances(&[51.5074], &[-0.1278], &[48.8566], &[2.3522], GeoFormula::Vincenty)
        .unwrap();
    assert!((vincenty[0] - london_paris[0]).abs() < 5.0);

    let square = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 0.0];
    let inside = backend
        .batch_point_in_polygon(&[5.0, 15.0], &[5.0, 5.0], &square)
        .unwrap();
    assert_eq!(inside, vec![true, false]);
}

#[test]
fn capability_report_lists_builtins() {
    let registry = isolated_registry(cpu_only_config());
    let report = registry.capability_report();
    let capabilities: Vec<Capability> = report.registered.iter().map(|r| r.capability).collect();
    assert_eq!(capabilities, vec![Capability::Vector, Capability::Graph, Capability::Geo]);
    assert!(report.registered.iter().all(|r| r.plugin.is_none()));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["registered"][0]["backend_type"], "cpu");
    assert_eq!(json["registered"][0]["capabilities"]["supports_vector_ops"], true);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn knn_rows_sorted_and_bounded(
        seed in any::<u64>(),
        num_queries in 1usize..6,
        num_vectors in 0usize..40,
        dim in 1usize..12,
        k in 0usize..50,
    ) {
        let registry = isolated_registry(cpu_only_config());
        let backend = registry.get_best_vector_backend().unwrap();
        let queries = random_vectors(seed, num_queries, dim);
        let vectors = random_vectors(seed.wrapping_add(1), num_vectors, dim);

        let results = backend
            .batch_knn_search(&queries, &vectors, dim, k, DistanceMetric::L2)
            .unwrap();
        prop_assert_eq!(results.len(), num_queries);
        for row in &results {
            prop_assert_eq!(row.len(), k.min(num_vectors));
            for pair in row.windows(2) {
                prop_assert!(
                    pair[0].1 < pair[1].1 || (pair[0].1 == pair[1].1 && pair[0].0 < pair[1].0)
                );
            }
        }
    }
}
