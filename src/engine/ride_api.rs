use super::helpers::{
    bounded_text, ensure_admissible, ensure_stops, moved_on, with_retry, with_timeout,
    MAX_ADDRESS_LEN, MAX_COMMENT_LEN, MAX_REASON_LEN,
};
use super::quote_api::validate_points;
use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    api::{Acceptance, NewRide, RideAPI},
    auth::{Platform, User},
    entities::{Coordinates, DriverStats, Rating, Ride, Status, Transition},
    error::Error,
    notify::{Event, Subscription, Topic},
    pricing::trip_points,
    store::Guard,
};

impl Engine {
    /// Pushes a fresh open ride to every eligible driver's dispatch feed: online, fresh,
    /// in range and verified.
    async fn offer_to_drivers(&self, ride: &Ride) -> Result<usize, Error> {
        let nearby = self
            .stores
            .presence
            .nearby(
                ride.origin.coordinates,
                self.settings.dispatch_radius_meters,
                self.settings.presence_ttl(),
            )
            .await?;

        let mut offered = 0;
        for (presence, _) in nearby.iter() {
            if !self.stores.drivers.get(presence.driver_id).await?.is_verified() {
                continue;
            }

            self.publish(
                Topic::Driver(presence.driver_id),
                Event::RideOffered(ride.clone()),
            )
            .await;
            offered += 1;
        }

        Ok(offered)
    }

    /// The ledger may have applied our write even though the call reported a failure; if the
    /// ride now carries exactly this acceptance, it is ours.
    async fn recover_acceptance(
        &self,
        id: Uuid,
        driver_id: Uuid,
        err: Error,
    ) -> Result<Ride, Error> {
        if !err.is_ride_already_taken() {
            return Err(err);
        }

        match self.stores.rides.get(id).await {
            Ok(ride) if ride.status == Status::Accepted && ride.driver_id == Some(driver_id) => {
                tracing::info!("acceptance by {} already applied", driver_id);
                Ok(ride)
            }
            _ => Err(err),
        }
    }

    async fn settle_completion(&self, ride: &Ride) -> Result<bool, Error> {
        let (driver_id, fare) = match (ride.driver_id, ride.final_price) {
            (Some(driver_id), Some(fare)) => (driver_id, fare),
            _ => return Err(Error::unexpected("completed ride without driver or fare")),
        };

        let stats = self.stores.stats.clone();
        let ride_id = ride.id;

        with_retry(&self.settings.retry, "record_completion", || {
            let stats = stats.clone();
            async move { stats.record_completion(driver_id, ride_id, fare).await }
        })
        .await
    }

    async fn milestone<F>(
        &self,
        user: User,
        id: Uuid,
        action: &str,
        transition: Transition,
        mutation: F,
    ) -> Result<Ride, Error>
    where
        F: Fn(&mut Ride) -> Result<(), Error> + Clone + Send + Sync + 'static,
    {
        let ride = self.load_ride(id).await?;

        self.authorize(&user, "read", ride.clone()).await?;
        ensure_admissible(&ride, transition)?;
        self.authorize(&user, action, ride.clone()).await?;

        let seen = ride.version;
        let ride = self
            .commit(
                id,
                Guard::new(transition.allowed_from()),
                mutation,
                move |stored: &Ride| stored.version > seen && stored.reached(transition),
            )
            .await
            .map_err(|err| moved_on(err, transition))?;

        tracing::info!("ride {} is now {} (v{})", ride.id, ride.status, ride.version);

        self.publish_ride(&ride).await;

        Ok(ride)
    }
}

#[async_trait]
impl RideAPI for Engine {
    #[tracing::instrument(skip(self, new_ride), fields(user_id = %user.id))]
    async fn create_ride(&self, user: User, mut new_ride: NewRide) -> Result<Ride, Error> {
        self.authorize(&user, "create_ride", Platform::new()).await?;

        ensure_stops(new_ride.stops.len())?;
        for location in std::iter::once(&mut new_ride.origin)
            .chain(std::iter::once(&mut new_ride.destination))
            .chain(new_ride.stops.iter_mut())
        {
            location.address = bounded_text("address", &location.address, MAX_ADDRESS_LEN)?;
        }

        let stops: Vec<_> = new_ride.stops.iter().map(|s| s.coordinates).collect();
        let points = trip_points(
            &new_ride.origin.coordinates,
            &new_ride.destination.coordinates,
            &stops,
        );
        validate_points(&points)?;

        self.pricing
            .validate_offer(new_ride.offer_price, new_ride.category, &points)?;

        let (estimate, _) = self
            .estimate_trip(
                &new_ride.origin.coordinates,
                &new_ride.destination.coordinates,
                new_ride.category,
                &stops,
            )
            .await;

        let mut ride = Ride::new(
            user.id,
            new_ride.category,
            new_ride.origin,
            new_ride.destination,
            new_ride.stops,
            new_ride.offer_price,
        );
        ride.distance_meters = Some(estimate.distance_meters);
        ride.duration_seconds = Some(estimate.duration_seconds);

        let rides = self.stores.rides.clone();
        with_retry(&self.settings.retry, "create_ride", || {
            let rides = rides.clone();
            let ride = ride.clone();
            async move { rides.create(&ride).await }
        })
        .await?;

        tracing::info!("created ride {} with offer {}", ride.id, ride.offer_price);

        self.publish_ride(&ride).await;

        match self.offer_to_drivers(&ride).await {
            Ok(count) => tracing::info!("offered ride {} to {} drivers", ride.id, count),
            Err(err) => tracing::error!("failed to offer ride {}: {}", ride.id, err),
        }

        Ok(ride)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let ride = self.load_ride(id).await?;

        self.authorize(&user, "read", ride.clone()).await?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn accept(&self, user: User, id: Uuid, acceptance: Acceptance) -> Result<Ride, Error> {
        with_timeout(self.settings.acceptance_timeout, async {
            let ride = self.load_ride(id).await?;

            let (driver_id, price) = match acceptance {
                Acceptance::Offer => {
                    self.authorize(&user, "accept_offer", Platform::new()).await?;
                    self.authorize(&user, "accept_offer", ride.clone()).await?;

                    let online = self
                        .stores
                        .presence
                        .get(user.id)
                        .await?
                        .map(|p| p.is_online)
                        .unwrap_or(false);

                    if !online {
                        return Err(Error::invalid_input("driver must be online to accept"));
                    }

                    (user.id, ride.offer_price)
                }
                Acceptance::Bid(bid_id) => {
                    self.authorize(&user, "accept_bid", ride.clone()).await?;

                    let bid = self.stores.bids.get(bid_id).await?;
                    if bid.ride_id != id {
                        return Err(Error::bid_not_found());
                    }

                    if !self.stores.drivers.get(bid.user_id).await?.is_verified() {
                        return Err(Error::invalid_input("bidder is no longer verified"));
                    }

                    (bid.user_id, bid.bid_price)
                }
            };

            let now = Utc::now();
            let result = self
                .commit(
                    id,
                    Guard::new(Transition::Accept.allowed_from()),
                    move |ride: &mut Ride| ride.accept(driver_id, price, now),
                    |stored: &Ride| {
                        stored.reached(Transition::Accept) && stored.driver_id == Some(driver_id)
                    },
                )
                .await;

            let ride = match result {
                Ok(ride) => ride,
                Err(err) => return self.recover_acceptance(id, driver_id, err).await,
            };

            tracing::info!(
                "ride {} accepted by {} at {} (v{})",
                ride.id,
                driver_id,
                price,
                ride.version
            );

            self.publish_ride(&ride).await;

            Ok(ride)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn report_arrival(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let now = Utc::now();
        self.milestone(user, id, "arrive", Transition::Arrive, move |ride: &mut Ride| {
            ride.arrive(now)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn report_start(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let now = Utc::now();
        self.milestone(user, id, "start", Transition::Start, move |ride: &mut Ride| {
            ride.start(now)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn report_completion(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let current = self.load_ride(id).await?;

        // a retried completion repairs a side effect lost after the first commit
        if current.status == Status::Completed {
            self.authorize(&user, "complete", current.clone()).await?;

            if self.settle_completion(&current).await? {
                tracing::warn!("repaired missing completion record for ride {}", id);
            }

            return Err(Error::invalid_transition("ride is already completed"));
        }

        let now = Utc::now();
        let ride = self
            .milestone(user, id, "complete", Transition::Complete, move |ride: &mut Ride| {
                ride.complete(now)
            })
            .await?;

        if let Err(err) = self.settle_completion(&ride).await {
            tracing::error!("failed to record completion of ride {}: {}", ride.id, err);
        }

        Ok(ride)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn cancel_ride(
        &self,
        user: User,
        id: Uuid,
        expected_version: Option<i64>,
    ) -> Result<Ride, Error> {
        let ride = self.load_ride(id).await?;

        self.authorize(&user, "cancel", ride.clone()).await?;
        ensure_admissible(&ride, Transition::Cancel)?;

        // a cancel issued against an open ride must not take down a ride that got accepted
        // in the meantime
        let allowed: &[Status] = if ride.status.is_open() {
            &[Status::Pending, Status::Negotiating]
        } else {
            Transition::Cancel.allowed_from()
        };

        let cancelled_by = user.id;
        let seen = ride.version;
        let now = Utc::now();
        let ride = self
            .commit(
                id,
                Guard::new(allowed).at_version(expected_version),
                move |ride: &mut Ride| ride.cancel(cancelled_by, now),
                |stored: &Ride| {
                    stored.version > seen
                        && stored.reached(Transition::Cancel)
                        && stored.cancelled_by == Some(cancelled_by)
                },
            )
            .await
            .map_err(|err| moved_on(err, Transition::Cancel))?;

        tracing::info!("ride {} cancelled by {}", ride.id, cancelled_by);

        self.publish_ride(&ride).await;

        Ok(ride)
    }

    #[tracing::instrument(skip(self, reason), fields(user_id = %user.id))]
    async fn trigger_emergency(
        &self,
        user: User,
        id: Uuid,
        reason: String,
        coordinates: Option<Coordinates>,
    ) -> Result<Ride, Error> {
        if let Some(coordinates) = coordinates {
            validate_points(&[coordinates])?;
        }

        let triggered_by = user.id;
        let now = Utc::now();
        let reason = bounded_text("reason", &reason, MAX_REASON_LEN)?;

        let ride = self
            .milestone(
                user,
                id,
                "emergency",
                Transition::TriggerEmergency,
                move |ride: &mut Ride| {
                    ride.trigger_emergency(triggered_by, reason.clone(), coordinates, now)
                },
            )
            .await?;

        tracing::warn!("emergency raised on ride {} by {}", ride.id, triggered_by);

        Ok(ride)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn clear_emergency(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let now = Utc::now();
        self.milestone(
            user,
            id,
            "clear_emergency",
            Transition::ClearEmergency,
            move |ride: &mut Ride| ride.clear_emergency(now),
        )
        .await
    }

    #[tracing::instrument(skip(self, comment), fields(user_id = %user.id))]
    async fn rate_ride(
        &self,
        user: User,
        id: Uuid,
        stars: i16,
        comment: Option<String>,
    ) -> Result<DriverStats, Error> {
        let ride = self.load_ride(id).await?;

        self.authorize(&user, "rate", ride.clone()).await?;

        if ride.status != Status::Completed {
            return Err(Error::invalid_transition(format!(
                "cannot rate a ride that is {}",
                ride.status
            )));
        }

        if !(1..=5).contains(&stars) {
            return Err(Error::invalid_input("stars must be between 1 and 5"));
        }

        let comment = comment
            .map(|c| bounded_text("comment", &c, MAX_COMMENT_LEN))
            .transpose()?
            .filter(|c| !c.is_empty());

        let driver_id = ride
            .driver_id
            .ok_or_else(|| Error::unexpected("completed ride without driver"))?;

        let rating = Rating {
            ride_id: ride.id,
            driver_id,
            rider_id: user.id,
            stars,
            comment,
            created_at: Utc::now(),
        };

        if !self.stores.stats.record_rating(&rating).await? {
            return Err(Error::invalid_input("ride has already been rated"));
        }

        self.stores.stats.get(driver_id).await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn watch_ride(
        &self,
        user: User,
        id: Uuid,
    ) -> Result<(Ride, Subscription), Error> {
        let ride = self.load_ride(id).await?;
        self.authorize(&user, "read", ride).await?;

        // subscribe before the read so nothing committed in between is missed
        let subscription = self.notifier.subscribe(Topic::Ride(id));
        let ride = self.load_ride(id).await?;

        Ok((ride, subscription))
    }
}
