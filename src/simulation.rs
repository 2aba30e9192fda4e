//! Load generator that puts many drivers on the same open rides at once.
//!
//! Every round creates one ride and lets a pool of workers race to accept it. Exactly one
//! acceptance may win per ride; the report makes it easy to check that from tests and from
//! a running instance.

use std::sync::Arc;

use async_channel::{Receiver, Sender};
use rand_distr::{Distribution, Normal};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{Acceptance, DriverAPI, NewRide, PresenceAPI, RideAPI};
use crate::auth::User;
use crate::engine::Engine;
use crate::entities::{Coordinates, Location, Verification, VehicleCategory};
use crate::error::Error;

const SPREAD_DEGREES: f64 = 0.005;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub rides: usize,
    pub accepted: usize,
    pub lost: usize,
    pub failed: usize,
    /// Rides that ended up with more than one winner. Must stay zero.
    pub double_assigned: usize,
}

pub struct Simulation {
    engine: Arc<Engine>,
    origin: Coordinates,
    destination: Coordinates,
    drivers: Vec<User>,
}

impl Simulation {
    #[tracing::instrument(skip(engine))]
    pub async fn new(
        engine: Arc<Engine>,
        origin: Coordinates,
        destination: Coordinates,
        drivers: usize,
    ) -> Result<Self, Error> {
        let spread = Normal::new(0.0, SPREAD_DEGREES)
            .map_err(|e| Error::invalid_input(format!("spread: {}", e)))?;

        let admin = User::admin(Uuid::new_v4());
        let mut users = Vec::with_capacity(drivers);

        for _ in 0..drivers {
            let driver = User::driver(Uuid::new_v4());
            engine
                .set_verification(admin.clone(), driver.id, Verification::Verified)
                .await?;

            let position = {
                let mut rng = rand::thread_rng();
                Coordinates::new(
                    origin.lat + spread.sample(&mut rng),
                    origin.lng + spread.sample(&mut rng),
                )
            };

            engine
                .update_presence(driver.clone(), true, Some(position))
                .await?;
            users.push(driver);
        }

        tracing::info!("{} drivers online around {:?}", users.len(), origin);

        Ok(Self {
            engine,
            origin,
            destination,
            drivers: users,
        })
    }

    async fn create_ride(&self, offer_price: i64) -> Result<Uuid, Error> {
        let rider = User::rider(Uuid::new_v4());
        let ride = self
            .engine
            .create_ride(
                rider,
                NewRide {
                    category: VehicleCategory::Car,
                    origin: Location::new(self.origin, "origin".into()),
                    destination: Location::new(self.destination, "destination".into()),
                    stops: vec![],
                    offer_price,
                },
            )
            .await?;

        Ok(ride.id)
    }

    /// Every driver tries to accept the same ride; returns how many succeeded and lost.
    #[tracing::instrument(skip(self))]
    async fn race(&self, ride_id: Uuid) -> (usize, usize, usize) {
        let (tx, rx): (Sender<User>, Receiver<User>) = async_channel::unbounded();
        let tally = Arc::new(Mutex::new((0usize, 0usize, 0usize)));
        let mut handles = vec![];

        for _ in 0..self.drivers.len().clamp(1, 16) {
            let rx = rx.clone();
            let engine = self.engine.clone();
            let tally = tally.clone();

            handles.push(tokio::spawn(async move {
                while let Ok(driver) = rx.recv().await {
                    let result = engine.accept(driver, ride_id, Acceptance::Offer).await;

                    let mut tally = tally.lock().await;
                    match result {
                        Ok(_) => tally.0 += 1,
                        Err(err) if err.is_ride_already_taken() => tally.1 += 1,
                        Err(err) => {
                            tracing::warn!("acceptance failed: {}", err);
                            tally.2 += 1;
                        }
                    }
                }
            }));
        }

        for driver in self.drivers.iter().cloned() {
            if tx.send(driver).await.is_err() {
                break;
            }
        }
        tx.close();

        futures::future::join_all(handles).await;

        let tally = *tally.lock().await;
        tally
    }

    pub async fn run(&self, rounds: usize, offer_price: i64) -> Result<Report, Error> {
        let mut report = Report::default();

        for _ in 0..rounds {
            let ride_id = self.create_ride(offer_price).await?;
            let (accepted, lost, failed) = self.race(ride_id).await;

            report.rides += 1;
            report.accepted += accepted;
            report.lost += lost;
            report.failed += failed;
            if accepted > 1 {
                tracing::error!("ride {} accepted {} times", ride_id, accepted);
                report.double_assigned += 1;
            }
        }

        tracing::info!("simulation finished: {:?}", report);

        Ok(report)
    }
}
