//! Geographic utilities: great-circle distance, bearings and angle math.

use crate::GeoPoint;

/// Mean Earth radius in meters used for every distance in this crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points (haversine formula).
///
/// # Example
/// ```
/// use route_tracker::GeoPoint;
/// use route_tracker::geo_utils::haversine_distance;
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
/// let km = haversine_distance(&london, &paris) / 1000.0;
/// assert!((km - 343.5).abs() < 5.0);
/// ```
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Initial great-circle bearing from `from` to `to`, in degrees [0, 360).
///
/// 0° is north, 90° east.
pub fn initial_bearing(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance_m` from `origin` along `bearing_deg`.
pub fn destination_point(origin: &GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let angular = distance_m / EARTH_RADIUS_METERS;
    let bearing = bearing_deg.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    GeoPoint::new(lat2.to_degrees(), lon2.to_degrees())
}

/// Wrap an angle in degrees into [0, 360).
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in degrees (-180, 180].
pub fn shortest_angle_delta(from: f64, to: f64) -> f64 {
    let mut diff = to - from;
    while diff > 180.0 {
        diff -= 360.0;
    }
    while diff <= -180.0 {
        diff += 360.0;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_same_point() {
        let p = GeoPoint::new(51.5074, -0.1278);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        // 6_371_000 * pi / 180
        assert!(approx_eq(haversine_distance(&a, &b), 111_194.93, 0.5));
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = GeoPoint::new(10.0, 10.0);
        assert!(approx_eq(initial_bearing(&origin, &GeoPoint::new(11.0, 10.0)), 0.0, 1e-6));
        assert!(approx_eq(initial_bearing(&origin, &GeoPoint::new(9.0, 10.0)), 180.0, 1e-6));
        assert!(approx_eq(initial_bearing(&origin, &GeoPoint::new(10.0, 11.0)), 90.0, 0.2));
        assert!(approx_eq(initial_bearing(&origin, &GeoPoint::new(10.0, 9.0)), 270.0, 0.2));
    }

    #[test]
    fn test_destination_point_round_trip_distance() {
        let origin = GeoPoint::new(47.37, 8.55);
        let dest = destination_point(&origin, 45.0, 250.0);
        assert!(approx_eq(haversine_distance(&origin, &dest), 250.0, 0.01));
        assert!(approx_eq(initial_bearing(&origin, &dest), 45.0, 0.01));
    }

    #[test]
    fn test_shortest_angle_delta_wraps() {
        assert!(approx_eq(shortest_angle_delta(350.0, 10.0), 20.0, 1e-9));
        assert!(approx_eq(shortest_angle_delta(10.0, 350.0), -20.0, 1e-9));
        assert!(approx_eq(shortest_angle_delta(0.0, 180.0), 180.0, 1e-9));
        assert!(approx_eq(shortest_angle_delta(90.0, 90.0), 0.0, 1e-9));
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert!(approx_eq(normalize_degrees(-10.0), 350.0, 1e-9));
        assert!(approx_eq(normalize_degrees(725.0), 5.0, 1e-9));
    }
}
