use sqlx::{postgres::PgPoolOptions, Executor, Pool, Postgres};

use crate::error::Error;

pub struct PgPool(pub Pool<Postgres>);

impl PgPool {
    #[tracing::instrument(name = "PgPool::new", skip(db_uri))]
    pub async fn new(db_uri: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        Ok(Self(pool))
    }
}

/// Creates the tables the Postgres stores expect. Safe to run on every start.
#[tracing::instrument(skip_all)]
pub async fn migrate(pool: &Pool<Postgres>) -> Result<(), Error> {
    pool.execute("CREATE EXTENSION IF NOT EXISTS postgis")
        .await?;

    // ride ledger
    pool.execute("CREATE TABLE IF NOT EXISTS rides (id UUID PRIMARY KEY, status VARCHAR NOT NULL, version INT8 NOT NULL, created_at TIMESTAMPTZ NOT NULL, data JSONB NOT NULL)")
        .await?;
    pool.execute("CREATE INDEX IF NOT EXISTS rides_status_idx ON rides (status, created_at)")
        .await?;

    // bid book (append-only)
    pool.execute("CREATE TABLE IF NOT EXISTS bids (id UUID PRIMARY KEY, seq BIGSERIAL NOT NULL, ride_id UUID NOT NULL, user_id UUID NOT NULL, bid_price INT8 NOT NULL, message TEXT, created_at TIMESTAMPTZ NOT NULL, CONSTRAINT fk_bid_ride FOREIGN KEY(ride_id) REFERENCES rides(id))")
        .await?;
    pool.execute("CREATE INDEX IF NOT EXISTS bids_ride_idx ON bids (ride_id, created_at, seq)")
        .await?;

    // presence, current state only
    pool.execute("CREATE TABLE IF NOT EXISTS driver_presence (driver_id UUID PRIMARY KEY, is_online BOOLEAN NOT NULL, location geometry(Point, 4326), last_location_update TIMESTAMPTZ)")
        .await?;

    pool.execute("CREATE TABLE IF NOT EXISTS chat_messages (id UUID PRIMARY KEY, seq BIGSERIAL NOT NULL, ride_id UUID NOT NULL, sender_id UUID NOT NULL, message TEXT NOT NULL, is_read BOOLEAN NOT NULL DEFAULT FALSE, created_at TIMESTAMPTZ NOT NULL, CONSTRAINT fk_chat_ride FOREIGN KEY(ride_id) REFERENCES rides(id))")
        .await?;

    pool.execute("CREATE TABLE IF NOT EXISTS driver_stats (driver_id UUID PRIMARY KEY, completed_rides INT8 NOT NULL DEFAULT 0, earnings INT8 NOT NULL DEFAULT 0, rating_sum INT8 NOT NULL DEFAULT 0, rating_count INT8 NOT NULL DEFAULT 0)")
        .await?;
    pool.execute("CREATE TABLE IF NOT EXISTS driver_completions (ride_id UUID PRIMARY KEY, driver_id UUID NOT NULL, fare INT8 NOT NULL, completed_at TIMESTAMPTZ NOT NULL)")
        .await?;
    pool.execute("CREATE TABLE IF NOT EXISTS ride_ratings (ride_id UUID PRIMARY KEY, driver_id UUID NOT NULL, rider_id UUID NOT NULL, stars INT2 NOT NULL, comment TEXT, created_at TIMESTAMPTZ NOT NULL)")
        .await?;

    pool.execute("CREATE TABLE IF NOT EXISTS driver_profiles (driver_id UUID PRIMARY KEY, verification_status VARCHAR NOT NULL DEFAULT 'unverified', updated_at TIMESTAMPTZ NOT NULL)")
        .await?;

    Ok(())
}
