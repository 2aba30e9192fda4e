mod bid;
mod chat;
mod driver;
mod location;
mod presence;
mod quote;
mod ride;
mod stats;

pub use bid::Bid;
pub use chat::ChatMessage;
pub use driver::{DriverProfile, Verification};
pub use location::{Coordinates, Location};
pub use presence::Presence;
pub use quote::Quote;
pub use ride::{Emergency, Ride, Status, Transition, VehicleCategory};
pub use stats::{DriverStats, Rating};
