//! Geocoding and routing collaborators.

mod mapbox;
mod straight_line;

pub use mapbox::Mapbox;
pub use straight_line::StraightLine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{Coordinates, Location, VehicleCategory};
use crate::error::Error;

/// Assumed urban driving speed when nothing better is known, about 30 km/h.
pub const DEFAULT_SPEED_MPS: f64 = 8.33;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub polyline: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub address: String,
    pub coordinates: Coordinates,
}

#[async_trait]
pub trait MapsProvider: Send + Sync {
    /// Route through `points` in the given order.
    async fn route(
        &self,
        points: &[Coordinates],
        category: VehicleCategory,
    ) -> Result<RouteSummary, Error>;

    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Location, Error>;

    /// Ranked best match first.
    async fn search_places(
        &self,
        query: &str,
        proximity: Option<Coordinates>,
    ) -> Result<Vec<Place>, Error>;
}

pub fn eta_seconds(distance_meters: f64, speed_mps: Option<f64>) -> f64 {
    let speed = speed_mps
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(DEFAULT_SPEED_MPS);

    distance_meters.max(0.0) / speed
}

/// Address shown when geocoding is unavailable.
pub fn placeholder_address(coordinates: &Coordinates) -> String {
    format!("{:.5}, {:.5}", coordinates.lat, coordinates.lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_falls_back_to_default_speed() {
        assert_eq!(eta_seconds(833.0, None), 100.0);
        assert_eq!(eta_seconds(833.0, Some(0.0)), 100.0);
        assert_eq!(eta_seconds(100.0, Some(10.0)), 10.0);
        assert_eq!(eta_seconds(-5.0, None), 0.0);
    }

    #[test]
    fn placeholder_is_lat_lng() {
        let address = placeholder_address(&Coordinates::new(3.451234567, -76.532));
        assert_eq!(address, "3.45123, -76.53200");
    }
}
