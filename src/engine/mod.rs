mod bid_api;
mod chat_api;
mod driver_api;
mod helpers;
mod places_api;
mod presence_api;
mod quote_api;
mod ride_api;
pub mod sweeper;

use oso::Oso;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    api::API,
    auth::User,
    entities::Ride,
    error::Error,
    external::{MapsProvider, StraightLine},
    notify::{Event, Hub, Notifier, Topic},
    pricing::PricingTable,
    store::{Guard, Stores},
};

pub use helpers::RetryPolicy;

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// Drivers farther than this from the pickup are not offered the ride.
    pub dispatch_radius_meters: f64,
    /// A location older than this makes a driver ineligible.
    pub presence_ttl: Duration,
    pub acceptance_timeout: Duration,
    pub maps_timeout: Duration,
    pub retry: RetryPolicy,
    /// Open rides older than this are expired by the sweeper.
    pub pending_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            dispatch_radius_meters: 5_000.0,
            presence_ttl: Duration::from_secs(60),
            acceptance_timeout: Duration::from_secs(10),
            maps_timeout: Duration::from_secs(3),
            retry: RetryPolicy::default(),
            pending_ttl: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl DispatchSettings {
    fn presence_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.presence_ttl).unwrap_or_else(|_| chrono::Duration::seconds(60))
    }
}

pub struct Engine {
    stores: Stores,
    notifier: Arc<dyn Notifier>,
    maps: Arc<dyn MapsProvider>,
    fallback_maps: StraightLine,
    pricing: PricingTable,
    authorizor: Oso,
    settings: DispatchSettings,
}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        maps: Arc<dyn MapsProvider>,
        pricing: PricingTable,
        settings: DispatchSettings,
    ) -> Result<Self, Error> {
        pricing.validate()?;

        Ok(Self {
            stores,
            notifier,
            maps,
            fallback_maps: StraightLine,
            pricing,
            authorizor: crate::auth::authorizor::new()?,
            settings,
        })
    }

    /// In-memory stores, in-process hub, offline maps, default pricing.
    pub fn in_memory() -> Result<Self, Error> {
        Self::new(
            Stores::in_memory(),
            Arc::new(Hub::new()),
            Arc::new(StraightLine),
            PricingTable::default(),
            DispatchSettings::default(),
        )
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }
}

impl Engine {
    /// Checks the policy for `user`. Drivers are checked with their stored verification, never
    /// with what the caller claims.
    pub async fn authorize<Action, Resource>(
        &self,
        user: &User,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Action: oso::ToPolar + Send,
        Resource: oso::ToPolar + Send,
    {
        let actor = self.vetted(user).await?;

        if self.authorizor.is_allowed(actor, action, resource)? {
            return Ok(());
        }

        Err(Error::unauthorized())
    }

    async fn vetted(&self, user: &User) -> Result<User, Error> {
        if !user.is_driver() {
            return Ok(user.clone().with_verified(false));
        }

        let profile = self.stores.drivers.get(user.id).await?;
        Ok(user.clone().with_verified(profile.is_verified()))
    }

    /// Conditional write with transient failures retried. Guard rejections are returned as is,
    /// except after a transient failure: that attempt may have committed before its reply was
    /// lost, so the ride is re-read and returned when `landed` recognizes it as our write.
    async fn commit<F, L>(
        &self,
        id: uuid::Uuid,
        guard: Guard,
        mutation: F,
        landed: L,
    ) -> Result<Ride, Error>
    where
        F: Fn(&mut Ride) -> Result<(), Error> + Clone + Send + Sync + 'static,
        L: Fn(&Ride) -> bool,
    {
        let rides = self.stores.rides.clone();
        let faulted = Arc::new(AtomicBool::new(false));

        let result = helpers::with_retry(&self.settings.retry, "conditional_transition", || {
            let rides = rides.clone();
            let guard = guard.clone();
            let mutation = mutation.clone();
            let faulted = faulted.clone();
            async move {
                let result = rides
                    .conditional_transition(id, guard, Box::new(mutation))
                    .await;

                if matches!(&result, Err(err) if err.is_transient()) {
                    faulted.store(true, Ordering::SeqCst);
                }

                result
            }
        })
        .await;

        match result {
            Err(err) if err.is_ride_already_taken() && faulted.load(Ordering::SeqCst) => {
                let current = self.load_ride(id).await?;

                if landed(&current) {
                    tracing::warn!("ride {} write applied despite a failed reply", id);
                    return Ok(current);
                }

                Err(err)
            }
            result => result,
        }
    }

    async fn load_ride(&self, id: uuid::Uuid) -> Result<Ride, Error> {
        let rides = self.stores.rides.clone();

        helpers::with_retry(&self.settings.retry, "get_ride", || {
            let rides = rides.clone();
            async move { rides.get(id).await }
        })
        .await
    }

    /// Best effort: the ledger already holds the change, so a failed publish is only logged.
    async fn publish(&self, topic: Topic, event: Event) {
        let notifier = self.notifier.clone();
        let name = event.name();

        let result = helpers::with_retry(&self.settings.retry, "publish", || {
            let notifier = notifier.clone();
            let event = event.clone();
            async move { notifier.publish(topic, event).await }
        })
        .await;

        if let Err(err) = result {
            tracing::error!("failed to publish {} on {:?}: {}", name, topic, err);
        }
    }

    async fn publish_ride(&self, ride: &Ride) {
        self.publish(Topic::Ride(ride.id), Event::RideUpdated(ride.clone()))
            .await;
    }
}

impl API for Engine {}

#[test]
fn new_engine() {
    Engine::in_memory().unwrap();
}

#[test]
fn rejects_invalid_pricing() {
    let mut pricing = PricingTable::default();
    pricing.min_offer_ratio = 2.0;

    let err = Engine::new(
        Stores::in_memory(),
        Arc::new(Hub::new()),
        Arc::new(StraightLine),
        pricing,
        DispatchSettings::default(),
    )
    .err()
    .unwrap();

    assert_eq!(err.kind, crate::error::ErrorKind::Config);
}
