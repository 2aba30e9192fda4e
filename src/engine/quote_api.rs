use super::{
    helpers::{ensure_stops, with_timeout},
    Engine,
};

use async_trait::async_trait;

use crate::{
    api::QuoteAPI,
    auth::{Platform, User},
    entities::{Coordinates, Quote, VehicleCategory},
    error::Error,
    pricing::{suggestions, trip_points, Estimate},
};

impl Engine {
    /// Prices a trip along the routed path, or the straight-line path when routing fails.
    pub(crate) async fn estimate_trip(
        &self,
        origin: &Coordinates,
        destination: &Coordinates,
        category: VehicleCategory,
        stops: &[Coordinates],
    ) -> (Estimate, bool) {
        let points = trip_points(origin, destination, stops);

        let routed = with_timeout(
            self.settings.maps_timeout,
            self.maps.route(&points, category),
        )
        .await;

        match routed {
            Ok(route) => {
                let mut estimate = self.pricing.estimate_with_distance(
                    origin,
                    destination,
                    category,
                    stops,
                    route.distance_meters,
                );
                estimate.duration_seconds = route.duration_seconds;
                (estimate, true)
            }
            Err(err) => {
                tracing::warn!("routing unavailable, pricing the straight-line path: {}", err);
                (
                    self.pricing.estimate(origin, destination, category, stops),
                    false,
                )
            }
        }
    }
}

pub(crate) fn validate_points(points: &[Coordinates]) -> Result<(), Error> {
    match points.iter().find(|p| !p.is_valid()) {
        Some(p) => Err(Error::invalid_input(format!(
            "invalid coordinates {}, {}",
            p.lat, p.lng
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl QuoteAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn quote(
        &self,
        user: User,
        origin: Coordinates,
        destination: Coordinates,
        category: VehicleCategory,
        stops: Vec<Coordinates>,
    ) -> Result<Quote, Error> {
        self.authorize(&user, "quote", Platform::new()).await?;

        ensure_stops(stops.len())?;
        let points = trip_points(&origin, &destination, &stops);
        validate_points(&points)?;

        let (estimate, routed) = self
            .estimate_trip(&origin, &destination, category, &stops)
            .await;

        tracing::info!(
            "quoted {} for {:.0} m in zone {}",
            estimate.price,
            estimate.distance_meters,
            estimate.zone
        );

        Ok(Quote {
            category,
            price: estimate.price,
            suggestions: suggestions(estimate.price),
            minimum_offer: self.pricing.minimum_offer(category, &points),
            distance_meters: estimate.distance_meters,
            duration_seconds: estimate.duration_seconds,
            zone: estimate.zone,
            routed,
        })
    }
}
