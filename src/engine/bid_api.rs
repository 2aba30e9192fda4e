use super::helpers::{bounded_text, with_retry, MAX_MESSAGE_LEN};
use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::BidAPI,
    auth::{Platform, User},
    entities::{Bid, Ride, Status, Transition},
    error::Error,
    notify::{Event, Topic},
    store::Guard,
};

#[async_trait]
impl BidAPI for Engine {
    /// Bids are stored even when the ride has moved on; the caller then gets `StaleBid`.
    #[tracing::instrument(skip(self, message), fields(user_id = %user.id))]
    async fn post_bid(
        &self,
        user: User,
        ride_id: Uuid,
        bid_price: i64,
        message: Option<String>,
    ) -> Result<Bid, Error> {
        self.authorize(&user, "post_bid", Platform::new()).await?;

        let ride = self.load_ride(ride_id).await?;
        self.authorize(&user, "bid", ride.clone()).await?;

        if bid_price <= 0 {
            return Err(Error::invalid_input("bid price must be positive"));
        }

        let message = message
            .map(|m| bounded_text("message", &m, MAX_MESSAGE_LEN))
            .transpose()?
            .filter(|m| !m.is_empty());
        let bid = Bid::new(ride_id, user.id, bid_price, message);

        let bids = self.stores.bids.clone();
        let bid = with_retry(&self.settings.retry, "post_bid", || {
            let bids = bids.clone();
            let bid = bid.clone();
            async move { bids.post(&bid).await }
        })
        .await?;

        if !ride.status.is_open() {
            tracing::info!("bid {} on ride {} that is {}", bid.id, ride.id, ride.status);
            return Err(Error::stale_bid());
        }

        self.publish(Topic::Ride(ride_id), Event::BidPosted(bid.clone()))
            .await;

        if ride.status == Status::Pending {
            let opened = self
                .commit(
                    ride_id,
                    Guard::new(&[Status::Pending]),
                    |ride: &mut Ride| ride.open_negotiation(),
                    |stored: &Ride| stored.reached(Transition::Bid),
                )
                .await;

            match opened {
                Ok(ride) => self.publish_ride(&ride).await,
                // someone else moved it first; still fine while it stays open
                Err(err) if err.is_ride_already_taken() => {
                    let current = self.stores.rides.get(ride_id).await?;
                    if !current.status.is_open() {
                        return Err(Error::stale_bid());
                    }
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!("bid {} of {} on ride {}", bid.id, bid.bid_price, ride_id);

        Ok(bid)
    }

    #[tracing::instrument(skip(self), fields(user_id = %user.id))]
    async fn list_bids(&self, user: User, ride_id: Uuid) -> Result<Vec<Bid>, Error> {
        let ride = self.load_ride(ride_id).await?;
        self.authorize(&user, "list_bids", ride).await?;

        self.stores.bids.list_for(ride_id).await
    }
}
