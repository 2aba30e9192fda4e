use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    pub driver_id: Uuid,
    pub completed_rides: i64,
    pub earnings: i64,
    pub rating_sum: i64,
    pub rating_count: i64,
}

impl DriverStats {
    pub fn new(driver_id: Uuid) -> Self {
        Self {
            driver_id,
            ..Default::default()
        }
    }

    /// New drivers start at five stars until rated.
    pub fn average_rating(&self) -> f64 {
        if self.rating_count == 0 {
            return 5.0;
        }

        self.rating_sum as f64 / self.rating_count as f64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub rider_id: Uuid,
    pub stars: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_rating_defaults_to_five() {
        let mut stats = DriverStats::new(Uuid::new_v4());
        assert_eq!(stats.average_rating(), 5.0);

        stats.rating_sum = 9;
        stats.rating_count = 2;
        assert_eq!(stats.average_rating(), 4.5);
    }
}
