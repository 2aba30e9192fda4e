use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub sender_id: Uuid,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(ride_id: Uuid, sender_id: Uuid, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            ride_id,
            sender_id,
            message,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}
