//! Persistence contracts. Every backend must make `RideLedger::conditional_transition` a
//! single atomic compare-and-swap against the stored ride.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::entities::{
    Bid, ChatMessage, Coordinates, DriverProfile, DriverStats, Presence, Rating, Ride, Status,
    Verification,
};
use crate::error::Error;

/// Applied to the stored ride after the guard admits it. May be invoked more than once when a
/// backend retries a lost compare-and-swap, so it must not have side effects.
pub type Mutation = Box<dyn Fn(&mut Ride) -> Result<(), Error> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct Guard {
    pub allowed: Vec<Status>,
    pub expected_version: Option<i64>,
}

impl Guard {
    pub fn new(allowed: &[Status]) -> Self {
        Self {
            allowed: allowed.to_vec(),
            expected_version: None,
        }
    }

    pub fn at_version(mut self, version: Option<i64>) -> Self {
        self.expected_version = version;
        self
    }

    pub fn admits(&self, ride: &Ride) -> bool {
        if !self.allowed.contains(&ride.status) {
            return false;
        }

        match self.expected_version {
            Some(version) => ride.version == version,
            None => true,
        }
    }

    pub fn status_names(&self) -> Vec<String> {
        self.allowed.iter().map(|s| s.name().to_string()).collect()
    }
}

pub(crate) fn guard_rejection(ride: &Ride) -> Error {
    let mut err = Error::ride_already_taken();
    err.message = format!("{} (ride is {} at version {})", err.message, ride.status, ride.version);
    err
}

#[async_trait]
pub trait RideLedger: Send + Sync {
    async fn create(&self, ride: &Ride) -> Result<Uuid, Error>;

    async fn get(&self, id: Uuid) -> Result<Ride, Error>;

    /// Atomically applies `mutation` if the stored ride satisfies `guard`, bumping its version.
    /// Fails with `RideAlreadyTaken` when the guard rejects the current state.
    async fn conditional_transition(
        &self,
        id: Uuid,
        guard: Guard,
        mutation: Mutation,
    ) -> Result<Ride, Error>;

    async fn list_by_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error>;

    /// Latest committed state of a ride, starting with the current one.
    async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<Ride>, Error>;
}

#[async_trait]
pub trait BidBook: Send + Sync {
    async fn post(&self, bid: &Bid) -> Result<Bid, Error>;

    async fn get(&self, id: Uuid) -> Result<Bid, Error>;

    /// Bids of one ride in creation order.
    async fn list_for(&self, ride_id: Uuid) -> Result<Vec<Bid>, Error>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn upsert(&self, presence: &Presence) -> Result<(), Error>;

    async fn get(&self, driver_id: Uuid) -> Result<Option<Presence>, Error>;

    /// Online drivers with a fresh location within `radius_meters`, nearest first.
    async fn nearby(
        &self,
        origin: Coordinates,
        radius_meters: f64,
        freshness: Duration,
    ) -> Result<Vec<(Presence, f64)>, Error>;
}

#[async_trait]
pub trait ChatLog: Send + Sync {
    async fn append(&self, message: &ChatMessage) -> Result<ChatMessage, Error>;

    async fn list_for(&self, ride_id: Uuid) -> Result<Vec<ChatMessage>, Error>;

    /// Marks every message not sent by `reader_id` as read; returns how many changed.
    async fn mark_read(&self, ride_id: Uuid, reader_id: Uuid) -> Result<u64, Error>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Returns `false` when the ride was already counted.
    async fn record_completion(&self, driver_id: Uuid, ride_id: Uuid, fare: i64)
        -> Result<bool, Error>;

    /// Returns `false` when the ride was already rated.
    async fn record_rating(&self, rating: &Rating) -> Result<bool, Error>;

    async fn get(&self, driver_id: Uuid) -> Result<DriverStats, Error>;
}

#[async_trait]
pub trait DriverRegistry: Send + Sync {
    /// Drivers never seen before come back unverified.
    async fn get(&self, driver_id: Uuid) -> Result<DriverProfile, Error>;

    async fn set_verification(
        &self,
        driver_id: Uuid,
        verification: Verification,
    ) -> Result<DriverProfile, Error>;
}

/// The full set of stores the engine runs against.
#[derive(Clone)]
pub struct Stores {
    pub rides: Arc<dyn RideLedger>,
    pub bids: Arc<dyn BidBook>,
    pub presence: Arc<dyn PresenceStore>,
    pub chat: Arc<dyn ChatLog>,
    pub stats: Arc<dyn StatsStore>,
    pub drivers: Arc<dyn DriverRegistry>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            rides: Arc::new(memory::MemoryRideLedger::new()),
            bids: Arc::new(memory::MemoryBidBook::new()),
            presence: Arc::new(memory::MemoryPresenceStore::new()),
            chat: Arc::new(memory::MemoryChatLog::new()),
            stats: Arc::new(memory::MemoryStatsStore::new()),
            drivers: Arc::new(memory::MemoryDriverRegistry::new()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let rides = Arc::new(postgres::PgRideLedger::new(pool.clone()));
        Self {
            rides,
            bids: Arc::new(postgres::PgBidBook::new(pool.clone())),
            presence: Arc::new(postgres::PgPresenceStore::new(pool.clone())),
            chat: Arc::new(postgres::PgChatLog::new(pool.clone())),
            stats: Arc::new(postgres::PgStatsStore::new(pool.clone())),
            drivers: Arc::new(postgres::PgDriverRegistry::new(pool)),
        }
    }
}

/// Per-ride `watch` channels fed after each committed write.
#[derive(Default)]
pub struct Watchers {
    senders: std::sync::Mutex<std::collections::HashMap<Uuid, watch::Sender<Ride>>>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels nobody watches any more are dropped here as well as on notify.
    pub fn subscribe(&self, ride: Ride) -> watch::Receiver<Ride> {
        let mut senders = self.lock();
        senders.retain(|id, sender| *id == ride.id || sender.receiver_count() > 0);

        if let Some(sender) = senders.get(&ride.id) {
            if sender.borrow().version < ride.version {
                sender.send_replace(ride);
            }
            return sender.subscribe();
        }

        let id = ride.id;
        let (sender, receiver) = watch::channel(ride);
        senders.insert(id, sender);
        receiver
    }

    pub fn notify(&self, ride: &Ride) {
        let mut senders = self.lock();
        let Some(sender) = senders.get(&ride.id) else {
            return;
        };

        if sender.receiver_count() == 0 {
            senders.remove(&ride.id);
            return;
        }

        sender.send_if_modified(|current| {
            if current.version < ride.version {
                *current = ride.clone();
                return true;
            }
            false
        });
    }

    /// Rides with a live channel.
    pub fn watched(&self) -> usize {
        self.lock().len()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::HashMap<Uuid, watch::Sender<Ride>>> {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Location, VehicleCategory};

    fn ride() -> Ride {
        let here = Location::new(Coordinates::new(3.45, -76.53), "Cali".into());
        Ride::new(Uuid::new_v4(), VehicleCategory::Car, here.clone(), here, vec![], 20000)
    }

    #[test]
    fn unwatched_rides_are_dropped_on_next_subscribe() {
        let watchers = Watchers::new();

        let first = watchers.subscribe(ride());
        let second = watchers.subscribe(ride());
        assert_eq!(watchers.watched(), 2);

        drop(first);
        drop(second);
        let _third = watchers.subscribe(ride());
        assert_eq!(watchers.watched(), 1);
    }

    #[test]
    fn a_ride_keeps_its_channel_while_watched() {
        let watchers = Watchers::new();
        let watched = ride();

        let rx = watchers.subscribe(watched.clone());
        let _other = watchers.subscribe(ride());
        assert_eq!(watchers.watched(), 2);

        let mut newer = watched.clone();
        newer.version += 1;
        watchers.notify(&newer);
        assert_eq!(rx.borrow().version, newer.version);
    }
}
