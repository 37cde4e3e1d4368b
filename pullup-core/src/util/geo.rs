//! WGS84 coordinate helpers shared by the marker and report services.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_IN_METERS: f64 = 6_371_000.0;

/// The rough bounding box of South Korea. Operations outside of it are
/// rejected before any service logic runs.
pub const KOREA_MIN_LATITUDE: f64 = 32.0;
pub const KOREA_MAX_LATITUDE: f64 = 39.0;
pub const KOREA_MIN_LONGITUDE: f64 = 123.0;
pub const KOREA_MAX_LONGITUDE: f64 = 133.0;

/// Two markers closer than this are considered the same spot.
pub const NEARBY_DISTANCE_IN_METERS: f64 = 5.0;
/// Measurement slack applied to the nearby rule.
pub const NEARBY_TOLERANCE_IN_METERS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the point falls inside the South Korea bounding box.
    pub fn in_south_korea(&self) -> bool {
        (KOREA_MIN_LATITUDE..=KOREA_MAX_LATITUDE).contains(&self.latitude)
            && (KOREA_MIN_LONGITUDE..=KOREA_MAX_LONGITUDE).contains(&self.longitude)
    }

    /// Haversine distance to another point, in meters.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lng = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (delta_lng / 2.0).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_IN_METERS * c
    }

    /// Whether another point is within the nearby threshold, with tolerance.
    pub fn is_nearby(&self, other: &Point) -> bool {
        self.distance_to(other) < NEARBY_DISTANCE_IN_METERS + NEARBY_TOLERANCE_IN_METERS
    }

    /// A latitude/longitude window that encloses a circle of `radius` meters
    /// around the point. Used as a cheap SQL pre-filter before the exact
    /// haversine check.
    pub fn bounding_box(&self, radius_in_meters: f64) -> BoundingBox {
        let lat_delta = radius_in_meters / 111_320.0;
        let lng_delta =
            radius_in_meters / (111_320.0 * self.latitude.to_radians().cos().abs().max(1e-9));

        BoundingBox {
            min_latitude: self.latitude - lat_delta,
            max_latitude: self.latitude + lat_delta,
            min_longitude: self.longitude - lng_delta,
            max_longitude: self.longitude + lng_delta,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meters_north(point: Point, meters: f64) -> Point {
        // One degree of latitude is roughly 111.32km everywhere.
        Point::new(point.latitude + meters / 111_320.0, point.longitude)
    }

    #[test]
    fn test_distance() {
        let seoul = Point::new(37.5665, 126.9780);
        let nearby = meters_north(seoul, 100.0);

        let distance = seoul.distance_to(&nearby);
        assert!(
            (distance - 100.0).abs() < 1.0,
            "haversine should be accurate at small scale, got {distance}"
        );
    }

    #[test]
    fn test_nearby_boundary() {
        let origin = Point::new(37.5, 127.0);

        let at_four = meters_north(origin, 3.9);
        let at_five = meters_north(origin, 5.0);
        let past_threshold = meters_north(origin, 6.1);

        assert!(origin.is_nearby(&at_four), "3.9m is within the guard");
        assert!(origin.is_nearby(&at_five), "exactly 5m is within the guard");
        assert!(
            !origin.is_nearby(&past_threshold),
            "6.1m clears the guard including tolerance"
        );
    }

    #[test]
    fn test_south_korea_bounds() {
        assert!(Point::new(37.5665, 126.9780).in_south_korea());
        assert!(!Point::new(35.6762, 139.6503).in_south_korea(), "tokyo");
        assert!(!Point::new(31.9, 127.0).in_south_korea(), "below range");
    }

    #[test]
    fn test_bounding_box_encloses_radius() {
        let origin = Point::new(37.5, 127.0);
        let bounds = origin.bounding_box(500.0);

        let north = meters_north(origin, 499.0);
        assert!(north.latitude < bounds.max_latitude);
        assert!(north.latitude > bounds.min_latitude);
    }
}
