//! In-process stores. Each map sits behind a tokio `RwLock`; holding the write lock across
//! guard check and mutation is what makes the conditional transition atomic here.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use super::{
    guard_rejection, BidBook, ChatLog, DriverRegistry, Guard, Mutation, PresenceStore, RideLedger,
    StatsStore, Watchers,
};
use crate::entities::{
    Bid, ChatMessage, Coordinates, DriverProfile, DriverStats, Presence, Rating, Ride, Status,
    Verification,
};
use crate::error::Error;

#[derive(Default)]
pub struct MemoryRideLedger {
    rides: Arc<RwLock<HashMap<Uuid, Ride>>>,
    watchers: Watchers,
}

impl MemoryRideLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideLedger for MemoryRideLedger {
    #[tracing::instrument(skip_all, fields(ride_id = %ride.id))]
    async fn create(&self, ride: &Ride) -> Result<Uuid, Error> {
        let mut rides = self.rides.write().await;
        if rides.contains_key(&ride.id) {
            return Err(Error::invalid_input("ride id already exists"));
        }

        rides.insert(ride.id, ride.clone());
        Ok(ride.id)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Ride, Error> {
        self.rides
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(Error::ride_not_found)
    }

    #[tracing::instrument(skip(self, mutation))]
    async fn conditional_transition(
        &self,
        id: Uuid,
        guard: Guard,
        mutation: Mutation,
    ) -> Result<Ride, Error> {
        let mut rides = self.rides.write().await;
        let current = rides.get_mut(&id).ok_or_else(Error::ride_not_found)?;

        if !guard.admits(current) {
            return Err(guard_rejection(current));
        }

        let mut next = current.clone();
        mutation(&mut next)?;
        next.version = current.version + 1;
        *current = next.clone();
        drop(rides);

        self.watchers.notify(&next);
        Ok(next)
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error> {
        let mut rides: Vec<Ride> = self
            .rides
            .read()
            .await
            .values()
            .filter(|ride| statuses.contains(&ride.status))
            .cloned()
            .collect();

        rides.sort_by_key(|ride| ride.created_at);
        Ok(rides)
    }

    async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<Ride>, Error> {
        let rides = self.rides.read().await;
        let ride = rides.get(&id).cloned().ok_or_else(Error::ride_not_found)?;
        Ok(self.watchers.subscribe(ride))
    }
}

#[derive(Default)]
pub struct MemoryBidBook {
    bids: Arc<RwLock<BidIndex>>,
}

#[derive(Default)]
struct BidIndex {
    by_id: HashMap<Uuid, Bid>,
    by_ride: HashMap<Uuid, Vec<Uuid>>,
}

impl MemoryBidBook {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BidBook for MemoryBidBook {
    #[tracing::instrument(skip_all, fields(ride_id = %bid.ride_id, bid_id = %bid.id))]
    async fn post(&self, bid: &Bid) -> Result<Bid, Error> {
        let mut index = self.bids.write().await;
        if index.by_id.contains_key(&bid.id) {
            return Err(Error::invalid_input("bid id already exists"));
        }

        index.by_id.insert(bid.id, bid.clone());
        index.by_ride.entry(bid.ride_id).or_default().push(bid.id);
        Ok(bid.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Bid, Error> {
        self.bids
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(Error::bid_not_found)
    }

    async fn list_for(&self, ride_id: Uuid) -> Result<Vec<Bid>, Error> {
        let index = self.bids.read().await;
        let bids = index
            .by_ride
            .get(&ride_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(bids)
    }
}

#[derive(Default)]
pub struct MemoryPresenceStore {
    drivers: Arc<RwLock<HashMap<Uuid, Presence>>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    #[tracing::instrument(skip_all, fields(driver_id = %presence.driver_id))]
    async fn upsert(&self, presence: &Presence) -> Result<(), Error> {
        let mut drivers = self.drivers.write().await;
        let next = match drivers.get(&presence.driver_id) {
            // going offline without a position keeps the last known one
            Some(previous) if presence.coordinates.is_none() => Presence {
                coordinates: previous.coordinates,
                last_location_update: previous.last_location_update,
                ..presence.clone()
            },
            _ => presence.clone(),
        };

        drivers.insert(presence.driver_id, next);
        Ok(())
    }

    async fn get(&self, driver_id: Uuid) -> Result<Option<Presence>, Error> {
        Ok(self.drivers.read().await.get(&driver_id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn nearby(
        &self,
        origin: Coordinates,
        radius_meters: f64,
        freshness: Duration,
    ) -> Result<Vec<(Presence, f64)>, Error> {
        let now = Utc::now();
        let mut found: Vec<(Presence, f64)> = self
            .drivers
            .read()
            .await
            .values()
            .filter(|p| p.is_dispatchable(now, freshness))
            .filter_map(|p| {
                let distance = p.coordinates?.haversine_distance(&origin);
                (distance <= radius_meters).then(|| (p.clone(), distance))
            })
            .collect();

        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(found)
    }
}

#[derive(Default)]
pub struct MemoryChatLog {
    messages: Arc<RwLock<HashMap<Uuid, Vec<ChatMessage>>>>,
}

impl MemoryChatLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatLog for MemoryChatLog {
    #[tracing::instrument(skip_all, fields(ride_id = %message.ride_id))]
    async fn append(&self, message: &ChatMessage) -> Result<ChatMessage, Error> {
        self.messages
            .write()
            .await
            .entry(message.ride_id)
            .or_default()
            .push(message.clone());

        Ok(message.clone())
    }

    async fn list_for(&self, ride_id: Uuid) -> Result<Vec<ChatMessage>, Error> {
        Ok(self
            .messages
            .read()
            .await
            .get(&ride_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(&self, ride_id: Uuid, reader_id: Uuid) -> Result<u64, Error> {
        let mut messages = self.messages.write().await;
        let mut changed = 0;

        for message in messages.get_mut(&ride_id).into_iter().flatten() {
            if message.sender_id != reader_id && !message.is_read {
                message.is_read = true;
                changed += 1;
            }
        }

        Ok(changed)
    }
}

#[derive(Default)]
pub struct MemoryStatsStore {
    inner: Arc<RwLock<StatsIndex>>,
}

#[derive(Default)]
struct StatsIndex {
    drivers: HashMap<Uuid, DriverStats>,
    completed: HashSet<Uuid>,
    rated: HashSet<Uuid>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    #[tracing::instrument(skip(self))]
    async fn record_completion(
        &self,
        driver_id: Uuid,
        ride_id: Uuid,
        fare: i64,
    ) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        if !inner.completed.insert(ride_id) {
            return Ok(false);
        }

        let stats = inner
            .drivers
            .entry(driver_id)
            .or_insert_with(|| DriverStats::new(driver_id));
        stats.completed_rides += 1;
        stats.earnings += fare;
        Ok(true)
    }

    #[tracing::instrument(skip_all, fields(ride_id = %rating.ride_id))]
    async fn record_rating(&self, rating: &Rating) -> Result<bool, Error> {
        let mut inner = self.inner.write().await;
        if !inner.rated.insert(rating.ride_id) {
            return Ok(false);
        }

        let stats = inner
            .drivers
            .entry(rating.driver_id)
            .or_insert_with(|| DriverStats::new(rating.driver_id));
        stats.rating_sum += rating.stars as i64;
        stats.rating_count += 1;
        Ok(true)
    }

    async fn get(&self, driver_id: Uuid) -> Result<DriverStats, Error> {
        Ok(self
            .inner
            .read()
            .await
            .drivers
            .get(&driver_id)
            .cloned()
            .unwrap_or_else(|| DriverStats::new(driver_id)))
    }
}

#[derive(Default)]
pub struct MemoryDriverRegistry {
    profiles: Arc<RwLock<HashMap<Uuid, DriverProfile>>>,
}

impl MemoryDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DriverRegistry for MemoryDriverRegistry {
    async fn get(&self, driver_id: Uuid) -> Result<DriverProfile, Error> {
        Ok(self
            .profiles
            .read()
            .await
            .get(&driver_id)
            .cloned()
            .unwrap_or_else(|| DriverProfile::new(driver_id)))
    }

    #[tracing::instrument(skip(self))]
    async fn set_verification(
        &self,
        driver_id: Uuid,
        verification: Verification,
    ) -> Result<DriverProfile, Error> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(driver_id)
            .or_insert_with(|| DriverProfile::new(driver_id));
        profile.verification = verification;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Location, VehicleCategory};

    fn ride() -> Ride {
        let here = Location::new(Coordinates::new(3.45, -76.53), "Cali".into());
        Ride::new(
            Uuid::new_v4(),
            VehicleCategory::Car,
            here.clone(),
            here,
            vec![],
            20000,
        )
    }

    #[tokio::test]
    async fn conditional_transition_bumps_version() {
        let ledger = MemoryRideLedger::new();
        let ride = ride();
        ledger.create(&ride).await.unwrap();

        let updated = ledger
            .conditional_transition(
                ride.id,
                Guard::new(&[Status::Pending]),
                Box::new(|r: &mut Ride| r.open_negotiation()),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, Status::Negotiating);
        assert_eq!(updated.version, 2);
        assert_eq!(ledger.get(ride.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn rejected_guard_leaves_ride_untouched() {
        let ledger = MemoryRideLedger::new();
        let ride = ride();
        ledger.create(&ride).await.unwrap();

        let err = ledger
            .conditional_transition(
                ride.id,
                Guard::new(&[Status::Ongoing]),
                Box::new(|r: &mut Ride| r.complete(Utc::now())),
            )
            .await
            .unwrap_err();

        assert!(err.is_ride_already_taken());
        assert_eq!(ledger.get(ride.id).await.unwrap(), ride);
    }

    #[tokio::test]
    async fn failed_mutation_is_not_committed() {
        let ledger = MemoryRideLedger::new();
        let ride = ride();
        ledger.create(&ride).await.unwrap();

        let err = ledger
            .conditional_transition(
                ride.id,
                Guard::new(&[Status::Pending]),
                Box::new(|r: &mut Ride| -> Result<(), Error> {
                    r.offer_price = 1;
                    Err(Error::invalid_transition("nope"))
                }),
            )
            .await
            .unwrap_err();

        assert!(err.is_invalid_transition());
        assert_eq!(ledger.get(ride.id).await.unwrap().offer_price, 20000);
    }

    #[tokio::test]
    async fn version_guard_rejects_stale_writers() {
        let ledger = MemoryRideLedger::new();
        let ride = ride();
        ledger.create(&ride).await.unwrap();

        ledger
            .conditional_transition(
                ride.id,
                Guard::new(&[Status::Pending]),
                Box::new(|r: &mut Ride| r.open_negotiation()),
            )
            .await
            .unwrap();

        let err = ledger
            .conditional_transition(
                ride.id,
                Guard::new(&[Status::Negotiating]).at_version(Some(1)),
                Box::new(|r: &mut Ride| r.expire(Utc::now())),
            )
            .await
            .unwrap_err();
        assert!(err.is_ride_already_taken());
    }

    #[tokio::test]
    async fn subscribers_see_committed_writes() {
        let ledger = MemoryRideLedger::new();
        let ride = ride();
        ledger.create(&ride).await.unwrap();

        let mut rx = ledger.subscribe(ride.id).await.unwrap();
        assert_eq!(rx.borrow().status, Status::Pending);

        ledger
            .conditional_transition(
                ride.id,
                Guard::new(&[Status::Pending]),
                Box::new(|r: &mut Ride| r.open_negotiation()),
            )
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, Status::Negotiating);
    }

    #[tokio::test]
    async fn unknown_ride_is_not_found() {
        let ledger = MemoryRideLedger::new();
        assert!(ledger.get(Uuid::new_v4()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn bids_are_listed_in_insertion_order() {
        let book = MemoryBidBook::new();
        let ride_id = Uuid::new_v4();
        let driver = Uuid::new_v4();

        let first = book
            .post(&Bid::new(ride_id, driver, 25000, None))
            .await
            .unwrap();
        let second = book
            .post(&Bid::new(ride_id, driver, 24000, Some("again".into())))
            .await
            .unwrap();
        book.post(&Bid::new(Uuid::new_v4(), driver, 1, None))
            .await
            .unwrap();

        let listed = book.list_for(ride_id).await.unwrap();
        assert_eq!(listed, vec![first.clone(), second]);
        assert_eq!(book.get(first.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn nearby_filters_and_orders_drivers() {
        let store = MemoryPresenceStore::new();
        let origin = Coordinates::new(3.45, -76.53);

        let near = Presence::new(Uuid::new_v4(), true, Some(Coordinates::new(3.451, -76.53)));
        let nearer = Presence::new(Uuid::new_v4(), true, Some(Coordinates::new(3.4501, -76.53)));
        let offline = Presence::new(Uuid::new_v4(), false, Some(origin));
        let far = Presence::new(Uuid::new_v4(), true, Some(Coordinates::new(3.6, -76.53)));

        for p in [&near, &nearer, &offline, &far] {
            store.upsert(p).await.unwrap();
        }

        let found = store
            .nearby(origin, 2000.0, Duration::seconds(60))
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|(p, _)| p.driver_id).collect();
        assert_eq!(ids, vec![nearer.driver_id, near.driver_id]);
    }

    #[tokio::test]
    async fn mark_read_only_touches_the_other_party() {
        let log = MemoryChatLog::new();
        let ride_id = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let driver = Uuid::new_v4();

        log.append(&ChatMessage::new(ride_id, rider, "hola".into()))
            .await
            .unwrap();
        log.append(&ChatMessage::new(ride_id, driver, "voy".into()))
            .await
            .unwrap();

        assert_eq!(log.mark_read(ride_id, rider).await.unwrap(), 1);
        assert_eq!(log.mark_read(ride_id, rider).await.unwrap(), 0);

        let messages = log.list_for(ride_id).await.unwrap();
        assert!(!messages[0].is_read);
        assert!(messages[1].is_read);
    }

    #[tokio::test]
    async fn completion_is_counted_once_per_ride() {
        let stats = MemoryStatsStore::new();
        let driver = Uuid::new_v4();
        let ride_id = Uuid::new_v4();

        assert!(stats.record_completion(driver, ride_id, 20000).await.unwrap());
        assert!(!stats.record_completion(driver, ride_id, 20000).await.unwrap());

        let s = stats.get(driver).await.unwrap();
        assert_eq!(s.completed_rides, 1);
        assert_eq!(s.earnings, 20000);
    }

    #[tokio::test]
    async fn unknown_drivers_are_unverified_until_set() {
        let registry = MemoryDriverRegistry::new();
        let driver = Uuid::new_v4();

        assert_eq!(
            registry.get(driver).await.unwrap().verification,
            Verification::Unverified
        );

        registry
            .set_verification(driver, Verification::Verified)
            .await
            .unwrap();
        assert!(registry.get(driver).await.unwrap().is_verified());
    }
}
