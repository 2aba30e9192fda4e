use geo_types::{Geometry, Point};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in meters.
    pub fn haversine_distance(&self, other: &Coordinates) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_METERS * c
    }
}

// geo-types points are (x, y) = (lng, lat)
impl From<Coordinates> for Point<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Point::new(coordinates.lng, coordinates.lat)
    }
}

impl From<Coordinates> for Geometry<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Geometry::Point(coordinates.into())
    }
}

impl From<Point<f64>> for Coordinates {
    fn from(point: Point<f64>) -> Self {
        Coordinates {
            lat: point.y(),
            lng: point.x(),
        }
    }
}

impl From<Coordinates> for String {
    fn from(coordinates: Coordinates) -> Self {
        format!("{},{}", coordinates.lat, coordinates.lng)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coordinates: Coordinates,
    pub address: String,
}

impl Location {
    pub fn new(coordinates: Coordinates, address: String) -> Self {
        Self {
            coordinates,
            address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_distance_is_zero_for_same_point() {
        let point = Coordinates::new(3.4516, -76.5320);
        assert!(point.haversine_distance(&point).abs() < 1e-6);
    }

    #[test]
    fn haversine_distance_matches_known_value() {
        // one degree of latitude is roughly 111.2 km
        let a = Coordinates::new(0.0, 0.0);
        let b = Coordinates::new(1.0, 0.0);
        let d = a.haversine_distance(&b);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
        assert!((b.haversine_distance(&a) - d).abs() < 1e-6);
    }

    #[test]
    fn invalid_coordinates_are_rejected() {
        assert!(Coordinates::new(3.0, -76.0).is_valid());
        assert!(!Coordinates::new(91.0, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn point_conversion_swaps_axes() {
        let c = Coordinates::new(3.5, -76.2);
        let p: Point<f64> = c.into();
        assert_eq!(p.x(), -76.2);
        assert_eq!(p.y(), 3.5);
        assert_eq!(Coordinates::from(p), c);
    }
}
