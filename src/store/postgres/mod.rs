//! Postgres-backed stores. Rides are JSONB documents next to the columns the conditional
//! write filters on.

mod bids;
mod chat;
mod drivers;
mod presence;
mod rides;
mod stats;

pub use bids::PgBidBook;
pub use chat::PgChatLog;
pub use drivers::PgDriverRegistry;
pub use presence::PgPresenceStore;
pub use rides::PgRideLedger;
pub use stats::PgStatsStore;

type Database = sqlx::Postgres;
