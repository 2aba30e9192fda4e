use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A driver's counter-offer. Append-only: never updated or deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub user_id: Uuid,
    pub bid_price: i64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    pub fn new(ride_id: Uuid, user_id: Uuid, bid_price: i64, message: Option<String>) -> Self {
        Bid {
            id: Uuid::new_v4(),
            ride_id,
            user_id,
            bid_price,
            message,
            created_at: Utc::now(),
        }
    }
}
