use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

use crate::notify::{Event, Notice, Subscription};

fn to_sse(notice: Notice) -> Result<SseEvent, axum::Error> {
    match notice {
        Notice::Event(event) => {
            let sse = SseEvent::default().event(event.name());
            match event {
                Event::RideUpdated(ride) | Event::RideOffered(ride) => {
                    sse.json_data(ride).map_err(axum::Error::new)
                }
                Event::BidPosted(bid) => sse.json_data(bid).map_err(axum::Error::new),
                Event::MessagePosted(message) => {
                    sse.json_data(message).map_err(axum::Error::new)
                }
            }
        }
        Notice::Resync => Ok(SseEvent::default().event("resync").data("resync")),
    }
}

/// Optional snapshot first, then every notice until the topic closes or the client leaves.
pub fn stream<T: Serialize>(
    snapshot: Option<(&'static str, T)>,
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    let first = snapshot.map(|(name, data)| {
        SseEvent::default()
            .event(name)
            .json_data(data)
            .map_err(axum::Error::new)
    });

    let notices = stream::unfold(subscription, |mut subscription| async move {
        let notice = subscription.recv().await?;
        Some((to_sse(notice), subscription))
    });

    Sse::new(stream::iter(first).chain(notices)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Bid, ChatMessage, Coordinates, Location, Ride, VehicleCategory};
    use uuid::Uuid;

    #[test]
    fn every_notice_becomes_an_sse_event() {
        let here = Location::new(Coordinates::new(-12.0464, -77.0428), "Lima".into());
        let ride = Ride::new(Uuid::new_v4(), VehicleCategory::Car, here.clone(), here, vec![], 20000);

        let notices = vec![
            Notice::Event(Event::RideUpdated(ride.clone())),
            Notice::Event(Event::RideOffered(ride.clone())),
            Notice::Event(Event::BidPosted(Bid::new(ride.id, Uuid::new_v4(), 21000, None))),
            Notice::Event(Event::MessagePosted(ChatMessage::new(
                ride.id,
                ride.rider_id,
                "hola".into(),
            ))),
            Notice::Resync,
        ];

        for notice in notices {
            assert!(to_sse(notice).is_ok());
        }
    }
}
