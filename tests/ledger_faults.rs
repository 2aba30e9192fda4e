use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use pasaje::api::{Acceptance, DriverAPI, NewRide, PresenceAPI, RideAPI};
use pasaje::auth::User;
use pasaje::engine::{DispatchSettings, Engine, RetryPolicy};
use pasaje::entities::{Coordinates, Location, Ride, Status, Verification, VehicleCategory};
use pasaje::error::Error;
use pasaje::external::StraightLine;
use pasaje::notify::Hub;
use pasaje::pricing::PricingTable;
use pasaje::store::memory::MemoryRideLedger;
use pasaje::store::{Guard, Mutation, RideLedger, Stores};

/// Reports the next `failures` conditional writes as lost after committing them, and fails
/// the next `refusals` before they reach the ledger.
struct LossyLedger {
    inner: MemoryRideLedger,
    failures: Arc<AtomicUsize>,
    refusals: Arc<AtomicUsize>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl RideLedger for LossyLedger {
    async fn create(&self, ride: &Ride) -> Result<Uuid, Error> {
        self.inner.create(ride).await
    }

    async fn get(&self, id: Uuid) -> Result<Ride, Error> {
        self.inner.get(id).await
    }

    async fn conditional_transition(
        &self,
        id: Uuid,
        guard: Guard,
        mutation: Mutation,
    ) -> Result<Ride, Error> {
        if take_one(&self.refusals) {
            return Err(Error::database("connection refused"));
        }

        let result = self.inner.conditional_transition(id, guard, mutation).await?;

        if take_one(&self.failures) {
            return Err(Error::database("connection reset by peer"));
        }

        Ok(result)
    }

    async fn list_by_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error> {
        self.inner.list_by_status(statuses).await
    }

    async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<Ride>, Error> {
        self.inner.subscribe(id).await
    }
}

struct Faults {
    failures: Arc<AtomicUsize>,
    refusals: Arc<AtomicUsize>,
}

fn lossy_engine() -> (Engine, Faults) {
    let faults = Faults {
        failures: Arc::new(AtomicUsize::new(0)),
        refusals: Arc::new(AtomicUsize::new(0)),
    };
    let stores = Stores {
        rides: Arc::new(LossyLedger {
            inner: MemoryRideLedger::new(),
            failures: faults.failures.clone(),
            refusals: faults.refusals.clone(),
        }),
        ..Stores::in_memory()
    };
    let settings = DispatchSettings {
        retry: RetryPolicy {
            attempts: 3,
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
        },
        ..DispatchSettings::default()
    };

    let engine = Engine::new(
        stores,
        Arc::new(Hub::new()),
        Arc::new(StraightLine),
        PricingTable::default(),
        settings,
    )
    .unwrap();

    (engine, faults)
}

fn new_ride() -> NewRide {
    let origin = Coordinates::new(-12.0464, -77.0428);
    NewRide {
        category: VehicleCategory::Car,
        origin: Location::new(origin, "Plaza de Armas".into()),
        destination: Location::new(Coordinates::new(-12.0014, -77.0428), "Rimac".into()),
        stops: vec![],
        offer_price: 20000,
    }
}

async fn driver_on_duty(engine: &Engine) -> User {
    let driver = User::driver(Uuid::new_v4());
    engine
        .set_verification(User::admin(Uuid::new_v4()), driver.id, Verification::Verified)
        .await
        .unwrap();
    engine
        .update_presence(driver.clone(), true, Some(Coordinates::new(-12.0464, -77.0428)))
        .await
        .unwrap();
    driver
}

#[tokio::test]
async fn milestones_survive_a_lost_reply() {
    let (engine, faults) = lossy_engine();
    let rider = User::rider(Uuid::new_v4());
    let driver = driver_on_duty(&engine).await;

    let ride = engine.create_ride(rider.clone(), new_ride()).await.unwrap();
    let ride = engine
        .accept(driver.clone(), ride.id, Acceptance::Offer)
        .await
        .unwrap();

    faults.failures.store(1, Ordering::SeqCst);
    let arrived = engine.report_arrival(driver.clone(), ride.id).await.unwrap();
    assert_eq!(arrived.status, Status::DriverArriving);
    assert_eq!(arrived.version, ride.version + 1);

    engine.report_start(driver.clone(), ride.id).await.unwrap();

    faults.failures.store(1, Ordering::SeqCst);
    let completed = engine
        .report_completion(driver.clone(), ride.id)
        .await
        .unwrap();
    assert_eq!(completed.status, Status::Completed);
    assert!(completed.is_consistent());

    let stats = engine.driver_stats(driver.clone(), driver.id).await.unwrap();
    assert_eq!(stats.completed_rides, 1);
    assert_eq!(stats.earnings, 20000);
}

#[tokio::test]
async fn cancel_survives_a_lost_reply() {
    let (engine, faults) = lossy_engine();
    let rider = User::rider(Uuid::new_v4());

    let ride = engine.create_ride(rider.clone(), new_ride()).await.unwrap();

    faults.failures.store(1, Ordering::SeqCst);
    let cancelled = engine
        .cancel_ride(rider.clone(), ride.id, None)
        .await
        .unwrap();

    assert_eq!(cancelled.status, Status::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(rider.id));
    assert_eq!(cancelled.version, ride.version + 1);
}

#[tokio::test]
async fn acceptance_survives_a_lost_reply() {
    let (engine, faults) = lossy_engine();
    let rider = User::rider(Uuid::new_v4());
    let driver = driver_on_duty(&engine).await;

    let ride = engine.create_ride(rider, new_ride()).await.unwrap();

    faults.failures.store(1, Ordering::SeqCst);
    let accepted = engine
        .accept(driver.clone(), ride.id, Acceptance::Offer)
        .await
        .unwrap();

    assert_eq!(accepted.status, Status::Accepted);
    assert_eq!(accepted.driver_id, Some(driver.id));
}

#[tokio::test]
async fn someone_elses_write_is_not_claimed() {
    let (engine, faults) = lossy_engine();
    let rider = User::rider(Uuid::new_v4());
    let winner = driver_on_duty(&engine).await;
    let loser = driver_on_duty(&engine).await;

    let ride = engine.create_ride(rider, new_ride()).await.unwrap();
    engine
        .accept(winner.clone(), ride.id, Acceptance::Offer)
        .await
        .unwrap();

    // the loser's first attempt fails in transit, the retry finds the winner's write
    faults.refusals.store(1, Ordering::SeqCst);
    let err = engine
        .accept(loser, ride.id, Acceptance::Offer)
        .await
        .unwrap_err();
    assert!(err.is_ride_already_taken());

    let stored = engine.stores().rides.get(ride.id).await.unwrap();
    assert_eq!(stored.driver_id, Some(winner.id));
}

#[tokio::test]
async fn arrival_lost_before_commit_is_retried() {
    let (engine, faults) = lossy_engine();
    let rider = User::rider(Uuid::new_v4());
    let driver = driver_on_duty(&engine).await;

    let ride = engine.create_ride(rider, new_ride()).await.unwrap();
    let ride = engine
        .accept(driver.clone(), ride.id, Acceptance::Offer)
        .await
        .unwrap();

    faults.refusals.store(1, Ordering::SeqCst);
    let arrived = engine.report_arrival(driver, ride.id).await.unwrap();
    assert_eq!(arrived.status, Status::DriverArriving);
    assert_eq!(arrived.version, ride.version + 1);
}
