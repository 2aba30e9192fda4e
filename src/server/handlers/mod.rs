pub mod bids;
pub mod drivers;
pub mod messages;
pub mod places;
pub mod quotes;
pub mod rides;

mod events;
