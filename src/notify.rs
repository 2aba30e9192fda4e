//! Fan-out of committed ride changes to interested sessions.
//!
//! Delivery is best-effort: the ledger stays the source of truth, and a subscriber that falls
//! behind is told to re-read it (`Notice::Resync`) instead of receiving a gap-free history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgListener, Pool, Postgres};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::entities::{Bid, ChatMessage, Ride};
use crate::error::Error;
use crate::store::Stores;

pub const PG_CHANNEL: &str = "pasaje_events";

const TOPIC_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    /// Rider and driver sessions of one ride.
    Ride(Uuid),
    /// Dispatch feed of one driver.
    Driver(Uuid),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    RideUpdated(Ride),
    BidPosted(Bid),
    MessagePosted(ChatMessage),
    RideOffered(Ride),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RideUpdated(_) => "ride_updated",
            Self::BidPosted(_) => "bid_posted",
            Self::MessagePosted(_) => "message_posted",
            Self::RideOffered(_) => "ride_offered",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    Event(Event),
    /// Events were dropped; re-read the ledger.
    Resync,
}

type Topics = Arc<Mutex<HashMap<Topic, broadcast::Sender<Event>>>>;

pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
    topics: Topics,
}

impl Drop for Subscription {
    /// The last subscriber to leave removes its topic.
    fn drop(&mut self) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let last = topics
            .get(&self.topic)
            .map_or(false, |sender| sender.receiver_count() <= 1);
        if last {
            topics.remove(&self.topic);
        }
    }
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<Notice> {
        match self.receiver.recv().await {
            Ok(event) => Some(Notice::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("subscriber on {:?} lagged by {} events", self.topic, skipped);
                Some(Notice::Resync)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: Topic, event: Event) -> Result<(), Error>;

    fn subscribe(&self, topic: Topic) -> Subscription;
}

/// Drives `handler` for every notice on `topic`. Abort the handle to unsubscribe.
pub fn subscribe_with<F, Fut>(notifier: &dyn Notifier, topic: Topic, mut handler: F) -> JoinHandle<()>
where
    F: FnMut(Notice) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut subscription = notifier.subscribe(topic);

    tokio::spawn(async move {
        while let Some(notice) = subscription.recv().await {
            handler(notice).await;
        }
    })
}

/// In-process broadcast hub, one channel per topic.
#[derive(Clone, Default)]
pub struct Hub {
    topics: Topics,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of subscribers reached.
    pub fn deliver(&self, topic: Topic, event: Event) -> usize {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(sender) = topics.get(&topic) else {
            return 0;
        };

        match sender.send(event) {
            Ok(reached) => reached,
            Err(_) => {
                topics.remove(&topic);
                0
            }
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for Hub {
    #[tracing::instrument(skip(self, event), fields(event = event.name()))]
    async fn publish(&self, topic: Topic, event: Event) -> Result<(), Error> {
        let reached = self.deliver(topic, event);
        tracing::debug!("delivered to {} subscribers", reached);
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        let receiver = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(topic)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        Subscription {
            topic,
            receiver,
            topics: self.topics.clone(),
        }
    }
}

/// What crosses `NOTIFY`: the topic and a reference to the change. Payloads are capped at a
/// few kilobytes, so receivers load the record itself from the stores.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct Envelope {
    topic: Topic,
    change: Change,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Change {
    RideUpdated { ride_id: Uuid, version: i64 },
    RideOffered { ride_id: Uuid, version: i64 },
    BidPosted { bid_id: Uuid },
    MessagePosted { ride_id: Uuid, message_id: Uuid },
}

impl Change {
    fn of(event: &Event) -> Self {
        match event {
            Event::RideUpdated(ride) => Change::RideUpdated {
                ride_id: ride.id,
                version: ride.version,
            },
            Event::RideOffered(ride) => Change::RideOffered {
                ride_id: ride.id,
                version: ride.version,
            },
            Event::BidPosted(bid) => Change::BidPosted { bid_id: bid.id },
            Event::MessagePosted(message) => Change::MessagePosted {
                ride_id: message.ride_id,
                message_id: message.id,
            },
        }
    }

    /// Rebuilds the event from the stores. A ride may have moved past `version` by now; the
    /// newer state is delivered, since subscribers only keep the latest anyway.
    async fn resolve(self, stores: &Stores) -> Result<Event, Error> {
        match self {
            Change::RideUpdated { ride_id, version } => {
                let ride = stores.rides.get(ride_id).await?;
                if ride.version < version {
                    tracing::warn!("ride {} is behind v{} on this replica", ride_id, version);
                }
                Ok(Event::RideUpdated(ride))
            }
            Change::RideOffered { ride_id, .. } => {
                Ok(Event::RideOffered(stores.rides.get(ride_id).await?))
            }
            Change::BidPosted { bid_id } => Ok(Event::BidPosted(stores.bids.get(bid_id).await?)),
            Change::MessagePosted {
                ride_id,
                message_id,
            } => stores
                .chat
                .list_for(ride_id)
                .await?
                .into_iter()
                .find(|message| message.id == message_id)
                .map(Event::MessagePosted)
                .ok_or_else(|| Error::unexpected(format!("message {} not found", message_id))),
        }
    }
}

/// Publishes through Postgres `NOTIFY` so every replica sharing the database relays the event
/// into its own hub.
pub struct PgNotifier {
    pool: Pool<Postgres>,
    hub: Hub,
}

impl PgNotifier {
    #[tracing::instrument(name = "PgNotifier::start", skip_all)]
    pub async fn start(
        pool: Pool<Postgres>,
        hub: Hub,
        stores: Stores,
    ) -> Result<(Self, JoinHandle<()>), Error> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(PG_CHANNEL).await?;

        let relay = hub.clone();
        let handle = tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(err) => {
                        tracing::error!("listener error: {}", err);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let Envelope { topic, change } =
                    match serde_json::from_str::<Envelope>(notification.payload()) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            tracing::warn!("dropping malformed notification: {}", err);
                            continue;
                        }
                    };

                // nobody here is listening, skip the read
                if relay.subscriber_count(topic) == 0 {
                    continue;
                }

                match change.resolve(&stores).await {
                    Ok(event) => {
                        relay.deliver(topic, event);
                    }
                    Err(err) => tracing::warn!("dropping {:?} on {:?}: {}", change, topic, err),
                }
            }
        });

        Ok((Self { pool, hub }, handle))
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    #[tracing::instrument(skip(self, event), fields(event = event.name()))]
    async fn publish(&self, topic: Topic, event: Event) -> Result<(), Error> {
        let payload = serde_json::to_string(&Envelope {
            topic,
            change: Change::of(&event),
        })?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(PG_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.hub.subscribe(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Coordinates, Location, VehicleCategory};

    fn ride() -> Ride {
        let here = Location::new(Coordinates::new(3.45, -76.53), "Cali".into());
        Ride::new(Uuid::new_v4(), VehicleCategory::Moto, here.clone(), here, vec![], 6000)
    }

    #[tokio::test]
    async fn events_reach_only_their_topic() {
        let hub = Hub::new();
        let ride = ride();

        let mut mine = hub.subscribe(Topic::Ride(ride.id));
        let mut other = hub.subscribe(Topic::Ride(Uuid::new_v4()));

        hub.publish(Topic::Ride(ride.id), Event::RideUpdated(ride.clone()))
            .await
            .unwrap();

        assert_eq!(mine.recv().await, Some(Notice::Event(Event::RideUpdated(ride))));
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), other.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_resync() {
        let hub = Hub::new();
        let ride = ride();
        let topic = Topic::Ride(ride.id);
        let mut sub = hub.subscribe(topic);

        for _ in 0..TOPIC_CAPACITY + 5 {
            hub.deliver(topic, Event::RideUpdated(ride.clone()));
        }

        assert_eq!(sub.recv().await, Some(Notice::Resync));
        assert!(matches!(sub.recv().await, Some(Notice::Event(_))));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let hub = Hub::new();
        let topic = Topic::Driver(Uuid::new_v4());

        let sub = hub.subscribe(topic);
        assert_eq!(hub.subscriber_count(topic), 1);
        drop(sub);

        assert_eq!(hub.deliver(topic, Event::RideOffered(ride())), 0);
        assert_eq!(hub.subscriber_count(topic), 0);
    }

    #[tokio::test]
    async fn topics_are_removed_with_their_last_subscriber() {
        let hub = Hub::new();
        let topic = Topic::Ride(Uuid::new_v4());

        let first = hub.subscribe(topic);
        let second = hub.subscribe(topic);
        let elsewhere = hub.subscribe(Topic::Driver(Uuid::new_v4()));
        assert_eq!(hub.topics.lock().unwrap().len(), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(topic), 1);
        assert!(hub.topics.lock().unwrap().contains_key(&topic));

        drop(second);
        assert!(!hub.topics.lock().unwrap().contains_key(&topic));

        drop(elsewhere);
        assert!(hub.topics.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_runs_until_aborted() {
        let hub = Hub::new();
        let topic = Topic::Ride(Uuid::new_v4());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = subscribe_with(&hub, topic, move |notice| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(notice);
            }
        });

        hub.publish(topic, Event::RideOffered(ride())).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Notice::Event(Event::RideOffered(_)))));

        handle.abort();
        let _ = handle.await;
        assert_eq!(hub.subscriber_count(topic), 0);
    }

    #[test]
    fn envelope_stays_small_whatever_the_ride_carries() {
        let mut ride = ride();
        ride.origin.address = "x".repeat(20_000);

        let json = serde_json::to_string(&Envelope {
            topic: Topic::Ride(ride.id),
            change: Change::of(&Event::RideUpdated(ride.clone())),
        })
        .unwrap();

        assert!(json.len() < 256, "{} bytes", json.len());

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["topic"]["kind"], "ride");
        assert_eq!(value["change"]["type"], "ride_updated");
        assert_eq!(value["change"]["ride_id"], ride.id.to_string());
    }

    #[tokio::test]
    async fn changes_resolve_against_the_stores() {
        use crate::entities::{Bid, ChatMessage};

        let stores = Stores::in_memory();
        let ride = ride();
        stores.rides.create(&ride).await.unwrap();
        let bid = stores
            .bids
            .post(&Bid::new(ride.id, Uuid::new_v4(), 7000, None))
            .await
            .unwrap();
        let message = stores
            .chat
            .append(&ChatMessage::new(ride.id, ride.rider_id, "hola".into()))
            .await
            .unwrap();

        for event in [
            Event::RideUpdated(ride.clone()),
            Event::RideOffered(ride.clone()),
            Event::BidPosted(bid),
            Event::MessagePosted(message),
        ] {
            let resolved = Change::of(&event).resolve(&stores).await.unwrap();
            assert_eq!(resolved, event);
        }

        let missing = Change::BidPosted {
            bid_id: Uuid::new_v4(),
        };
        assert!(missing.resolve(&stores).await.is_err());
    }
}
