use async_trait::async_trait;

use super::{placeholder_address, MapsProvider, Place, RouteSummary, DEFAULT_SPEED_MPS};
use crate::entities::{Coordinates, Location, VehicleCategory};
use crate::error::Error;
use crate::pricing::path_distance;

/// Offline provider: great-circle distances, constant speed, coordinates as addresses.
#[derive(Clone, Debug, Default)]
pub struct StraightLine;

#[async_trait]
impl MapsProvider for StraightLine {
    async fn route(
        &self,
        points: &[Coordinates],
        _category: VehicleCategory,
    ) -> Result<RouteSummary, Error> {
        let (origin, rest) = points
            .split_first()
            .ok_or_else(|| Error::invalid_input("route needs at least two points"))?;
        let (destination, stops) = rest
            .split_last()
            .ok_or_else(|| Error::invalid_input("route needs at least two points"))?;

        let distance_meters = path_distance(origin, destination, stops);

        Ok(RouteSummary {
            distance_meters,
            duration_seconds: distance_meters / DEFAULT_SPEED_MPS,
            polyline: None,
        })
    }

    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Location, Error> {
        Ok(Location::new(coordinates, placeholder_address(&coordinates)))
    }

    async fn search_places(
        &self,
        _query: &str,
        _proximity: Option<Coordinates>,
    ) -> Result<Vec<Place>, Error> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_through_stops_in_order() {
        let a = Coordinates::new(3.40, -76.55);
        let b = Coordinates::new(3.45, -76.55);
        let c = Coordinates::new(3.42, -76.55);

        let direct = StraightLine
            .route(&[a, c], VehicleCategory::Car)
            .await
            .unwrap();
        let via_b = StraightLine
            .route(&[a, b, c], VehicleCategory::Car)
            .await
            .unwrap();

        assert!(via_b.distance_meters > direct.distance_meters);
        assert!((via_b.duration_seconds - via_b.distance_meters / DEFAULT_SPEED_MPS).abs() < 1e-9);
    }

    #[tokio::test]
    async fn single_point_is_rejected() {
        let a = Coordinates::new(3.40, -76.55);
        assert!(StraightLine.route(&[a], VehicleCategory::Moto).await.is_err());
    }
}
