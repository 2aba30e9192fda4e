use serde::{Deserialize, Serialize};

use crate::entities::VehicleCategory;

/// A suggested fare. Never authoritative: riders may offer a different price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub category: VehicleCategory,
    pub price: i64,
    pub suggestions: [i64; 3],
    pub minimum_offer: i64,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub zone: String,
    pub routed: bool,
}
