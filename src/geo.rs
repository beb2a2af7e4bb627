//! Great-circle distance and travel-time helpers.
//!
//! Every component above this module measures geography through these two
//! functions, so distances are consistent crate-wide. Straight-line estimates
//! ignore roads; the surrounding system accepts that tradeoff.

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two `(lat, lng)` points in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Convert a distance in kilometers to travel time in minutes at the given
/// average speed.
pub fn travel_time_mins(distance_km: f64, speed_kmh: f64) -> f64 {
    distance_km / speed_kmh * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        let dist = haversine_km((36.1, -115.1), (36.1, -115.1));
        assert!(dist < 0.001, "Same point should have ~0 distance");
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // One degree of latitude is ~111.19 km everywhere on the sphere.
        let dist = haversine_km((12.0, 77.0), (13.0, 77.0));
        assert!(
            (dist - 111.19).abs() < 0.05,
            "1 deg latitude should be ~111.19km, got {}",
            dist
        );
    }

    #[test]
    fn test_known_city_pair() {
        // Las Vegas (36.17, -115.14) to Los Angeles (34.05, -118.24)
        // Actual distance ~370 km
        let dist = haversine_km((36.17, -115.14), (34.05, -118.24));
        assert!(dist > 350.0 && dist < 400.0, "LV to LA should be ~370km, got {}", dist);
    }

    #[test]
    fn test_symmetric() {
        let a = (36.1, -115.1);
        let b = (36.2, -115.2);
        assert_eq!(haversine_km(a, b), haversine_km(b, a));
    }

    #[test]
    fn test_travel_time() {
        // 10 km at 40 km/h = 15 minutes
        let mins = travel_time_mins(10.0, 40.0);
        assert!((mins - 15.0).abs() < 1e-9);
    }
}
