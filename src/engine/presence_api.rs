use super::quote_api::validate_points;
use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    api::PresenceAPI,
    auth::{Platform, Role, User},
    entities::{Coordinates, DriverStats, Presence, Ride, Status},
    error::Error,
    notify::{Subscription, Topic},
};

#[async_trait]
impl PresenceAPI for Engine {
    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn update_presence(
        &self,
        user: User,
        is_online: bool,
        coordinates: Option<Coordinates>,
    ) -> Result<Presence, Error> {
        self.authorize(&user, "update_presence", Platform::new()).await?;

        if let Some(coordinates) = coordinates {
            validate_points(&[coordinates])?;
        }

        let presence = Presence::new(user.id, is_online, coordinates);
        self.stores.presence.upsert(&presence).await?;

        Ok(self
            .stores
            .presence
            .get(user.id)
            .await?
            .unwrap_or(presence))
    }

    /// Open rides around the caller, nearest pickup first. Empty while the caller is offline
    /// or has no fresh location.
    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn open_rides(&self, user: User) -> Result<Vec<Ride>, Error> {
        self.authorize(&user, "accept_offer", Platform::new()).await?;

        let presence = match self.stores.presence.get(user.id).await? {
            Some(presence) => presence,
            None => return Ok(vec![]),
        };

        if !presence.is_dispatchable(Utc::now(), self.settings.presence_ttl()) {
            tracing::info!("driver {} is not dispatchable", user.id);
            return Ok(vec![]);
        }

        let position = match presence.coordinates {
            Some(position) => position,
            None => return Ok(vec![]),
        };

        let mut nearby: Vec<(f64, Ride)> = self
            .stores
            .rides
            .list_by_status(&[Status::Pending, Status::Negotiating])
            .await?
            .into_iter()
            .map(|ride| (ride.origin.coordinates.haversine_distance(&position), ride))
            .filter(|(distance, _)| *distance <= self.settings.dispatch_radius_meters)
            .collect();

        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(nearby.into_iter().map(|(_, ride)| ride).collect())
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn driver_stats(&self, user: User, driver_id: Uuid) -> Result<DriverStats, Error> {
        self.authorize(&user, "read_stats", Platform::new()).await?;

        if user.role == Role::Driver && user.id != driver_id {
            return Err(Error::unauthorized());
        }

        self.stores.stats.get(driver_id).await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn watch_dispatch(&self, user: User) -> Result<Subscription, Error> {
        self.authorize(&user, "update_presence", Platform::new()).await?;

        Ok(self.notifier.subscribe(Topic::Driver(user.id)))
    }
}
