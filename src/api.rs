use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::User;
use crate::entities::{
    Bid, ChatMessage, Coordinates, DriverProfile, DriverStats, Location, Presence, Quote, Ride,
    Verification, VehicleCategory,
};
use crate::error::Error;
use crate::external::{Place, RouteSummary};
use crate::notify::Subscription;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewRide {
    pub category: VehicleCategory,
    pub origin: Location,
    pub destination: Location,
    #[serde(default)]
    pub stops: Vec<Location>,
    pub offer_price: i64,
}

/// How a ride gets its driver. Both paths end in the same conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "bid_id", rename_all = "snake_case")]
pub enum Acceptance {
    /// The calling driver takes the rider's current offer.
    Offer,
    /// The rider takes a driver's bid at the bid's price.
    Bid(Uuid),
}

#[async_trait]
pub trait QuoteAPI {
    async fn quote(
        &self,
        user: User,
        origin: Coordinates,
        destination: Coordinates,
        category: VehicleCategory,
        stops: Vec<Coordinates>,
    ) -> Result<Quote, Error>;
}

#[async_trait]
pub trait RideAPI {
    async fn create_ride(&self, user: User, ride: NewRide) -> Result<Ride, Error>;

    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error>;

    async fn accept(&self, user: User, id: Uuid, acceptance: Acceptance) -> Result<Ride, Error>;

    async fn report_arrival(&self, user: User, id: Uuid) -> Result<Ride, Error>;

    async fn report_start(&self, user: User, id: Uuid) -> Result<Ride, Error>;

    async fn report_completion(&self, user: User, id: Uuid) -> Result<Ride, Error>;

    async fn cancel_ride(
        &self,
        user: User,
        id: Uuid,
        expected_version: Option<i64>,
    ) -> Result<Ride, Error>;

    async fn trigger_emergency(
        &self,
        user: User,
        id: Uuid,
        reason: String,
        coordinates: Option<Coordinates>,
    ) -> Result<Ride, Error>;

    async fn clear_emergency(&self, user: User, id: Uuid) -> Result<Ride, Error>;

    async fn rate_ride(
        &self,
        user: User,
        id: Uuid,
        stars: i16,
        comment: Option<String>,
    ) -> Result<DriverStats, Error>;

    /// Current state plus a subscription opened before it was read.
    async fn watch_ride(&self, user: User, id: Uuid) -> Result<(Ride, Subscription), Error>;
}

#[async_trait]
pub trait BidAPI {
    async fn post_bid(
        &self,
        user: User,
        ride_id: Uuid,
        bid_price: i64,
        message: Option<String>,
    ) -> Result<Bid, Error>;

    async fn list_bids(&self, user: User, ride_id: Uuid) -> Result<Vec<Bid>, Error>;
}

#[async_trait]
pub trait PresenceAPI {
    async fn update_presence(
        &self,
        user: User,
        is_online: bool,
        coordinates: Option<Coordinates>,
    ) -> Result<Presence, Error>;

    async fn open_rides(&self, user: User) -> Result<Vec<Ride>, Error>;

    async fn driver_stats(&self, user: User, driver_id: Uuid) -> Result<DriverStats, Error>;

    async fn watch_dispatch(&self, user: User) -> Result<Subscription, Error>;
}

#[async_trait]
pub trait DriverAPI {
    /// The calling driver submits documents for review.
    async fn request_verification(&self, user: User) -> Result<DriverProfile, Error>;

    async fn driver_profile(&self, user: User, driver_id: Uuid) -> Result<DriverProfile, Error>;

    /// Admin review outcome. Only verified drivers are offered rides or may bid.
    async fn set_verification(
        &self,
        user: User,
        driver_id: Uuid,
        verification: Verification,
    ) -> Result<DriverProfile, Error>;
}

#[async_trait]
pub trait ChatAPI {
    async fn send_message(
        &self,
        user: User,
        ride_id: Uuid,
        message: String,
    ) -> Result<ChatMessage, Error>;

    async fn list_messages(&self, user: User, ride_id: Uuid) -> Result<Vec<ChatMessage>, Error>;

    async fn mark_read(&self, user: User, ride_id: Uuid) -> Result<u64, Error>;
}

#[async_trait]
pub trait PlacesAPI {
    async fn search_places(
        &self,
        user: User,
        query: String,
        proximity: Option<Coordinates>,
    ) -> Result<Vec<Place>, Error>;

    async fn reverse_geocode(&self, user: User, coordinates: Coordinates)
        -> Result<Location, Error>;

    async fn route(
        &self,
        user: User,
        points: Vec<Coordinates>,
        category: VehicleCategory,
    ) -> Result<RouteSummary, Error>;
}

pub trait API:
    QuoteAPI + RideAPI + BidAPI + PresenceAPI + DriverAPI + ChatAPI + PlacesAPI
{
}
