use async_trait::async_trait;
use chrono::{Duration, Utc};
use geo_types::Geometry;
use geozero::wkb;
use sqlx::{postgres::PgRow, Executor, Pool, Row};
use uuid::Uuid;

use super::Database;
use crate::entities::{Coordinates, Presence};
use crate::error::Error;
use crate::store::PresenceStore;

pub struct PgPresenceStore {
    pool: Pool<Database>,
}

impl PgPresenceStore {
    pub fn new(pool: Pool<Database>) -> Self {
        Self { pool }
    }
}

fn presence_from_row(row: &PgRow) -> Result<Presence, Error> {
    let lat: Option<f64> = row.try_get("lat")?;
    let lng: Option<f64> = row.try_get("lng")?;

    Ok(Presence {
        driver_id: row.try_get("driver_id")?,
        is_online: row.try_get("is_online")?,
        coordinates: lat.zip(lng).map(|(lat, lng)| Coordinates::new(lat, lng)),
        last_location_update: row.try_get("last_location_update")?,
    })
}

#[async_trait]
impl PresenceStore for PgPresenceStore {
    #[tracing::instrument(skip_all, fields(driver_id = %presence.driver_id))]
    async fn upsert(&self, presence: &Presence) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        let location: Option<Geometry<f64>> = presence.coordinates.map(Into::into);

        // a missing position keeps the last known one
        conn.execute(
            sqlx::query(
                "INSERT INTO driver_presence (driver_id, is_online, location, last_location_update)
                VALUES ($1, $2, ST_SetSRID($3, 4326), $4)
                ON CONFLICT (driver_id) DO UPDATE SET
                    is_online = EXCLUDED.is_online,
                    location = COALESCE(EXCLUDED.location, driver_presence.location),
                    last_location_update = COALESCE(EXCLUDED.last_location_update, driver_presence.last_location_update)",
            )
            .bind(&presence.driver_id)
            .bind(presence.is_online)
            .bind(location.map(wkb::Encode))
            .bind(&presence.last_location_update),
        )
        .await?;

        Ok(())
    }

    async fn get(&self, driver_id: Uuid) -> Result<Option<Presence>, Error> {
        let mut conn = self.pool.acquire().await?;

        let row = conn
            .fetch_optional(
                sqlx::query(
                    "SELECT driver_id, is_online, ST_Y(location) AS lat, ST_X(location) AS lng, last_location_update
                    FROM driver_presence WHERE driver_id = $1",
                )
                .bind(&driver_id),
            )
            .await?;

        row.as_ref().map(presence_from_row).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn nearby(
        &self,
        origin: Coordinates,
        radius_meters: f64,
        freshness: Duration,
    ) -> Result<Vec<(Presence, f64)>, Error> {
        let origin: Geometry<f64> = origin.into();

        let query = "
            SELECT
                driver_id,
                is_online,
                ST_Y(location) AS lat,
                ST_X(location) AS lng,
                last_location_update,
                ST_Distance(location::geography, ST_SetSRID($1, 4326)::geography) AS distance
            FROM
                driver_presence
            WHERE
                is_online
                AND location IS NOT NULL
                AND last_location_update >= $3
                AND ST_DWithin(location::geography, ST_SetSRID($1, 4326)::geography, $2)
            ORDER BY
                distance ASC
        ";

        let mut conn = self.pool.acquire().await?;
        let rows = conn
            .fetch_all(
                sqlx::query(query)
                    .bind(wkb::Encode(origin))
                    .bind(radius_meters)
                    .bind(Utc::now() - freshness),
            )
            .await?;

        let mut found = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let distance: f64 = row.try_get("distance")?;
            found.push((presence_from_row(row)?, distance));
        }

        Ok(found)
    }
}
