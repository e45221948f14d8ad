//! Great-circle distance and geodesic hull area.
//!
//! Distances use the spherical haversine formula with a 6371 km radius.
//! Areas are computed on the WGS84 ellipsoid via [`geo::GeodesicArea`]
//! after reducing the point cloud to its convex hull.

use geo::{Area, ConvexHull, GeodesicArea, MultiPoint, Point};
use wind_siting_land_models::Coordinates;

/// Mean Earth radius used by [`haversine_distance_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Square metres per square kilometre.
const M2_PER_KM2: f64 = 1_000_000.0;

/// Great-circle distance between two positions, in kilometres.
///
/// No antimeridian handling: inputs are expected to lie within one
/// contiguous country extent.
#[must_use]
pub fn haversine_distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Geodesic area of the convex hull around `points`, in km².
///
/// Returns `0` for two or fewer points and for any degenerate hull
/// (duplicates collapsing to fewer than three distinct positions, or
/// collinear positions).
#[must_use]
pub fn polygon_area_km2(points: &[Coordinates]) -> f64 {
    if points.len() <= 2 {
        return 0.0;
    }

    let distinct = distinct_positions(points);
    if distinct.len() < 3 {
        return 0.0;
    }

    let cloud: MultiPoint<f64> = distinct
        .iter()
        .map(|c| Point::new(c.lon, c.lat))
        .collect::<Vec<_>>()
        .into();
    let hull = cloud.convex_hull();

    // Closed ring: three distinct vertices plus the closing coordinate.
    if hull.exterior().0.len() < 4 || hull.unsigned_area() <= f64::EPSILON {
        log::trace!("Degenerate hull over {} positions", distinct.len());
        return 0.0;
    }

    hull.geodesic_area_unsigned().abs() / M2_PER_KM2
}

fn distinct_positions(points: &[Coordinates]) -> Vec<Coordinates> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.lon.total_cmp(&b.lon).then(a.lat.total_cmp(&b.lat)));
    sorted.dedup_by(|a, b| a.lon.total_cmp(&b.lon).is_eq() && a.lat.total_cmp(&b.lat).is_eq());
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Roughly 1 km east-west at 52°N.
    const LON_STEP_1KM: f64 = 0.014_6;
    /// Roughly 1 km north-south.
    const LAT_STEP_1KM: f64 = 0.009;

    fn unit_square() -> Vec<Coordinates> {
        vec![
            Coordinates::new(19.0, 52.0),
            Coordinates::new(19.0 + LON_STEP_1KM, 52.0),
            Coordinates::new(19.0 + LON_STEP_1KM, 52.0 + LAT_STEP_1KM),
            Coordinates::new(19.0, 52.0 + LAT_STEP_1KM),
        ]
    }

    #[test]
    fn haversine_is_symmetric() {
        let warsaw = Coordinates::new(21.0122, 52.2297);
        let krakow = Coordinates::new(19.9450, 50.0647);

        let there = haversine_distance_km(warsaw, krakow);
        let back = haversine_distance_km(krakow, warsaw);

        assert!((there - back).abs() < 1e-12);
        assert!((there - 252.0).abs() < 3.0, "got {there}");
    }

    #[test]
    fn haversine_is_zero_for_identical_points() {
        let p = Coordinates::new(18.6466, 54.3520);
        assert!(haversine_distance_km(p, p).abs() < f64::EPSILON);
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_distance_km(Coordinates::new(20.0, 50.0), Coordinates::new(20.0, 51.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn area_is_zero_below_three_points() {
        assert!(polygon_area_km2(&[]).abs() < f64::EPSILON);
        assert!(polygon_area_km2(&[Coordinates::new(19.0, 52.0)]).abs() < f64::EPSILON);
        assert!(
            polygon_area_km2(&[Coordinates::new(19.0, 52.0), Coordinates::new(19.1, 52.1)])
                .abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn area_of_roughly_one_km_square() {
        let area = polygon_area_km2(&unit_square());
        assert!((area - 1.0).abs() < 0.05, "got {area}");
    }

    #[test]
    fn interior_points_do_not_change_area() {
        let mut points = unit_square();
        let base = polygon_area_km2(&points);
        points.push(Coordinates::new(
            19.0 + LON_STEP_1KM / 2.0,
            52.0 + LAT_STEP_1KM / 2.0,
        ));

        assert!((polygon_area_km2(&points) - base).abs() < 1e-9);
    }

    #[test]
    fn input_order_does_not_change_area() {
        let points = unit_square();
        let shuffled = vec![points[2], points[0], points[3], points[1]];

        assert!((polygon_area_km2(&points) - polygon_area_km2(&shuffled)).abs() < 1e-9);
    }

    #[test]
    fn collinear_points_have_zero_area() {
        let points = vec![
            Coordinates::new(19.0, 52.0),
            Coordinates::new(19.01, 52.01),
            Coordinates::new(19.02, 52.02),
            Coordinates::new(19.03, 52.03),
        ];
        assert!(polygon_area_km2(&points).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicates_collapsing_below_three_have_zero_area() {
        let p = Coordinates::new(19.0, 52.0);
        let q = Coordinates::new(19.01, 52.0);
        assert!(polygon_area_km2(&[p, p, q, q, p]).abs() < f64::EPSILON);
    }
}
