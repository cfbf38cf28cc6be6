//! Scalar kernel primitives
//!
//! The reference implementations every other strategy (SIMD, thread pool,
//! device kernels) must agree with. All functions are pure and
//! single-threaded.

use crate::types::{DistanceMetric, Neighbor};
use std::cmp::Ordering;

/// Norm below which a vector is treated as zero for cosine distance.
pub const COSINE_EPSILON: f32 = 1e-10;

/// Mean earth radius used by haversine, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_TOLERANCE: f64 = 1e-12;

/// Euclidean distance: squared differences accumulated, one `sqrt` at the end.
/// Unequal lengths are compared over the shorter operand.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = x - y;
        sum += d * d;
    }
    sum.sqrt()
}

/// Cosine distance `1 - dot / (|a| |b|)` in one pass.
///
/// Returns 1.0 when either norm is below [`COSINE_EPSILON`].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    cosine_from_parts(dot, norm_a, norm_b)
}

/// Finish a cosine distance from accumulated dot product and squared norms.
#[inline]
pub fn cosine_from_parts(dot: f32, norm_a_sq: f32, norm_b_sq: f32) -> f32 {
    let norm_a = norm_a_sq.sqrt();
    let norm_b = norm_b_sq.sqrt();
    if norm_a < COSINE_EPSILON || norm_b < COSINE_EPSILON {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Dispatch on metric.
#[inline]
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::L2 => l2_distance(a, b),
        DistanceMetric::Cosine => cosine_distance(a, b),
    }
}

/// Fill one distance-matrix row: `out[v] = kernel(query, vectors[v])`.
pub fn distance_row<F>(query: &[f32], vectors: &[f32], dim: usize, out: &mut [f32], kernel: F)
where
    F: Fn(&[f32], &[f32]) -> f32,
{
    for (slot, candidate) in out.iter_mut().zip(vectors.chunks_exact(dim)) {
        *slot = kernel(query, candidate);
    }
}

/// Ordering used by KNN selection: distance ascending, then index ascending.
///
/// Since the distance loop produces candidates in index order, the index
/// tie-break equals first-seen order.
#[inline]
pub fn neighbor_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

/// Keep the `k` nearest entries of a distance row, sorted ascending.
///
/// Partial selection followed by a sort of the kept prefix; the rest of the
/// row is never fully sorted.
pub fn select_k_nearest(row: &[f32], k: usize) -> Vec<Neighbor> {
    let k = k.min(row.len());
    if k == 0 {
        return Vec::new();
    }
    let mut hits: Vec<Neighbor> = row
        .iter()
        .enumerate()
        .map(|(i, d)| (i as u32, *d))
        .collect();
    if k < hits.len() {
        hits.select_nth_unstable_by(k - 1, neighbor_order);
        hits.truncate(k);
    }
    hits.sort_unstable_by(neighbor_order);
    hits
}

/// Great-circle distance in kilometres on a sphere of radius
/// [`EARTH_RADIUS_KM`].
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

/// Ellipsoidal (WGS-84) distance in kilometres by Vincenty's inverse formula.
///
/// The iteration does not converge for nearly antipodal points; in that case
/// the result degrades to [`haversine_km`]. Callers that need to know use
/// [`vincenty_inverse_km`].
pub fn vincenty_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    vincenty_inverse_km(lat1, lon1, lat2, lon2)
        .unwrap_or_else(|| haversine_km(lat1, lon1, lat2, lon2))
}

/// Vincenty's inverse formula, `None` when the iteration fails to converge.
pub fn vincenty_inverse_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    let b = (1.0 - WGS84_F) * WGS84_A;
    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial line: cos_sq_alpha == 0
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - prev).abs() < VINCENTY_TOLERANCE {
            let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(b * big_a * (sigma - delta_sigma) / 1000.0);
        }
    }
    None
}

/// Ray-casting containment test.
///
/// `polygon` is a flat `[lat0, lon0, lat1, lon1, ..]` ring of at least three
/// vertices. Correct for simple (non-self-intersecting) polygons only; the
/// half-open edge test `(lon_i > lon) != (lon_j > lon)` counts shared
/// vertices once.
pub fn point_in_polygon(lat: f64, lon: f64, polygon: &[f64]) -> bool {
    let n = polygon.len() / 2;
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (lat_i, lon_i) = (polygon[i * 2], polygon[i * 2 + 1]);
        let (lat_j, lon_j) = (polygon[j * 2], polygon[j * 2 + 1]);
        if ((lon_i > lon) != (lon_j > lon))
            && (lat < (lat_j - lat_i) * (lon - lon_i) / (lon_j - lon_i) + lat_i)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LONDON: (f64, f64) = (51.5074, -0.1278);
    const PARIS: (f64, f64) = (48.8566, 2.3522);

    #[test]
    fn test_l2_known_values() {
        assert_eq!(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(l2_distance(&[1.0, 1.0, 1.0, 1.0], &[1.0, 1.0, 1.0, 0.0]), 1.0);
        assert_eq!(l2_distance(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let v = [1.0, 2.0, 3.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_is_max_distance() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 2.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0, 2.0], &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_select_k_nearest_partial() {
        let row = [5.0, 1.0, 3.0, 0.5, 4.0];
        let hits = select_k_nearest(&row, 3);
        assert_eq!(hits, vec![(3, 0.5), (1, 1.0), (2, 3.0)]);
    }

    #[test]
    fn test_select_k_nearest_ties_keep_first_seen() {
        let row = [2.0, 1.0, 2.0, 2.0];
        let hits = select_k_nearest(&row, 3);
        assert_eq!(hits, vec![(1, 1.0), (0, 2.0), (2, 2.0)]);
    }

    #[test]
    fn test_select_k_larger_than_row() {
        assert_eq!(select_k_nearest(&[1.0, 0.0], 10).len(), 2);
        assert!(select_k_nearest(&[1.0], 0).is_empty());
        assert!(select_k_nearest(&[], 3).is_empty());
    }

    #[test]
    fn test_haversine_london_paris() {
        let d = haversine_km(LONDON.0, LONDON.1, PARIS.0, PARIS.1);
        assert!(d > 300.0 && d < 400.0, "got {}", d);
    }

    #[test]
    fn test_haversine_same_point_is_zero() {
        assert_eq!(haversine_km(10.0, 20.0, 10.0, 20.0), 0.0);
    }

    #[test]
    fn test_vincenty_close_to_haversine() {
        let h = haversine_km(LONDON.0, LONDON.1, PARIS.0, PARIS.1);
        let v = vincenty_km(LONDON.0, LONDON.1, PARIS.0, PARIS.1);
        assert!(v > 300.0 && v < 400.0);
        assert!((v - h).abs() / h < 0.01, "haversine {} vincenty {}", h, v);
    }

    #[test]
    fn test_vincenty_one_degree_on_equator() {
        // WGS-84: one degree of longitude at the equator is 111.319 km
        let v = vincenty_km(0.0, 0.0, 0.0, 1.0);
        assert!((v - 111.319).abs() < 0.01, "got {}", v);
    }

    #[test]
    fn test_vincenty_antipodal_degrades_to_haversine() {
        assert!(vincenty_inverse_km(0.0, 0.0, 0.5, 179.7).is_none());
        let d = vincenty_km(0.0, 0.0, 0.5, 179.7);
        assert_eq!(d, haversine_km(0.0, 0.0, 0.5, 179.7));
    }

    #[test]
    fn test_point_in_square() {
        let square = [0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0, 0.0];
        assert!(point_in_polygon(5.0, 5.0, &square));
        assert!(!point_in_polygon(15.0, 5.0, &square));
        assert!(!point_in_polygon(5.0, -1.0, &square));
    }

    #[test]
    fn test_point_in_concave_polygon() {
        // U shape opening towards high latitudes
        let u = [
            0.0, 0.0, 0.0, 3.0, 3.0, 3.0, 3.0, 2.0, 1.0, 2.0, 1.0, 1.0, 3.0, 1.0, 3.0, 0.0,
        ];
        assert!(point_in_polygon(0.5, 1.5, &u));
        assert!(!point_in_polygon(2.0, 1.5, &u));
        assert!(point_in_polygon(2.0, 0.5, &u));
    }

    #[test]
    fn test_degenerate_polygon_contains_nothing() {
        assert!(!point_in_polygon(0.0, 0.0, &[0.0, 0.0, 1.0, 1.0]));
    }

    proptest! {
        #[test]
        fn prop_l2_symmetric_and_non_negative(
            a in prop::collection::vec(-100.0f32..100.0, 1..32),
            seed in any::<u64>(),
        ) {
            let b: Vec<f32> = a.iter().enumerate()
                .map(|(i, x)| x + ((seed >> (i % 64)) & 7) as f32)
                .collect();
            let d1 = l2_distance(&a, &b);
            let d2 = l2_distance(&b, &a);
            prop_assert!(d1 >= 0.0);
            prop_assert!((d1 - d2).abs() <= 1e-4 * d1.max(1.0));
        }

        #[test]
        fn prop_cosine_in_range(
            a in prop::collection::vec(-10.0f32..10.0, 4),
            b in prop::collection::vec(-10.0f32..10.0, 4),
        ) {
            let d = cosine_distance(&a, &b);
            prop_assert!((-1e-5..=2.0 + 1e-5).contains(&d));
        }

        #[test]
        fn prop_haversine_bounded_by_half_circumference(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let d = haversine_km(lat1, lon1, lat2, lon2);
            prop_assert!(d >= 0.0);
            prop_assert!(d <= std::f64::consts::PI * EARTH_RADIUS_KM + 1e-6);
        }
    }
}
