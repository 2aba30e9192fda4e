use super::helpers::with_timeout;
use super::quote_api::validate_points;
use super::Engine;

use async_trait::async_trait;

use crate::{
    api::PlacesAPI,
    auth::{Platform, User},
    entities::{Coordinates, Location, VehicleCategory},
    error::{Error, ErrorKind},
    external::{MapsProvider, Place, RouteSummary},
};

// Maps failures never block a caller: each call degrades to the offline provider.
#[async_trait]
impl PlacesAPI for Engine {
    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn search_places(
        &self,
        user: User,
        query: String,
        proximity: Option<Coordinates>,
    ) -> Result<Vec<Place>, Error> {
        self.authorize(&user, "search_places", Platform::new()).await?;

        let found = with_timeout(
            self.settings.maps_timeout,
            self.maps.search_places(&query, proximity),
        )
        .await;

        match found {
            Ok(places) => Ok(places),
            Err(err) => {
                tracing::warn!("place search unavailable: {}", err);
                self.fallback_maps.search_places(&query, proximity).await
            }
        }
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn reverse_geocode(
        &self,
        user: User,
        coordinates: Coordinates,
    ) -> Result<Location, Error> {
        self.authorize(&user, "search_places", Platform::new()).await?;
        validate_points(&[coordinates])?;

        let found = with_timeout(
            self.settings.maps_timeout,
            self.maps.reverse_geocode(coordinates),
        )
        .await;

        match found {
            Ok(location) => Ok(location),
            Err(err) => {
                tracing::warn!("reverse geocoding unavailable: {}", err);
                self.fallback_maps.reverse_geocode(coordinates).await
            }
        }
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn route(
        &self,
        user: User,
        points: Vec<Coordinates>,
        category: VehicleCategory,
    ) -> Result<RouteSummary, Error> {
        self.authorize(&user, "quote", Platform::new()).await?;
        validate_points(&points)?;

        let routed = with_timeout(self.settings.maps_timeout, self.maps.route(&points, category))
            .await;

        match routed {
            Ok(route) => Ok(route),
            Err(err) if !err.is_transient() && err.kind != ErrorKind::Timeout => {
                Err(err)
            }
            Err(err) => {
                tracing::warn!("routing unavailable: {}", err);
                self.fallback_maps.route(&points, category).await
            }
        }
    }
}
