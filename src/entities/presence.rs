use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;

/// Current-state presence of one driver. Each update overwrites the previous one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub driver_id: Uuid,
    pub is_online: bool,
    pub coordinates: Option<Coordinates>,
    pub last_location_update: Option<DateTime<Utc>>,
}

impl Presence {
    pub fn new(driver_id: Uuid, is_online: bool, coordinates: Option<Coordinates>) -> Self {
        Self {
            driver_id,
            is_online,
            last_location_update: coordinates.map(|_| Utc::now()),
            coordinates,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.last_location_update {
            Some(updated) => now - updated <= ttl,
            None => false,
        }
    }

    /// Online with a location reported within `ttl`.
    pub fn is_dispatchable(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.is_online && self.coordinates.is_some() && self.is_fresh(now, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_location_is_not_dispatchable() {
        let mut presence = Presence::new(Uuid::new_v4(), true, Some(Coordinates::new(3.4, -76.5)));
        let now = Utc::now();
        assert!(presence.is_dispatchable(now, Duration::seconds(60)));

        presence.last_location_update = Some(now - Duration::seconds(120));
        assert!(!presence.is_dispatchable(now, Duration::seconds(60)));
    }

    #[test]
    fn offline_or_unlocated_driver_is_not_dispatchable() {
        let now = Utc::now();
        let offline = Presence::new(Uuid::new_v4(), false, Some(Coordinates::new(3.4, -76.5)));
        assert!(!offline.is_dispatchable(now, Duration::seconds(60)));

        let unlocated = Presence::new(Uuid::new_v4(), true, None);
        assert!(!unlocated.is_dispatchable(now, Duration::seconds(60)));
    }
}
