use async_trait::async_trait;
use sqlx::{Connection, Executor, Pool, Row};
use uuid::Uuid;

use super::Database;
use crate::entities::{DriverStats, Rating};
use crate::error::Error;
use crate::store::StatsStore;

pub struct PgStatsStore {
    pool: Pool<Database>,
}

impl PgStatsStore {
    pub fn new(pool: Pool<Database>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatsStore for PgStatsStore {
    #[tracing::instrument(skip(self))]
    async fn record_completion(
        &self,
        driver_id: Uuid,
        ride_id: Uuid,
        fare: i64,
    ) -> Result<bool, Error> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let inserted = tx
            .execute(
                sqlx::query(
                    "INSERT INTO driver_completions (ride_id, driver_id, fare, completed_at) VALUES ($1, $2, $3, now()) ON CONFLICT (ride_id) DO NOTHING",
                )
                .bind(&ride_id)
                .bind(&driver_id)
                .bind(fare),
            )
            .await?
            .rows_affected()
            == 1;

        if inserted {
            tx.execute(
                sqlx::query(
                    "INSERT INTO driver_stats (driver_id, completed_rides, earnings) VALUES ($1, 1, $2)
                    ON CONFLICT (driver_id) DO UPDATE SET
                        completed_rides = driver_stats.completed_rides + 1,
                        earnings = driver_stats.earnings + EXCLUDED.earnings",
                )
                .bind(&driver_id)
                .bind(fare),
            )
            .await?;
        }

        tx.commit().await?;

        Ok(inserted)
    }

    #[tracing::instrument(skip_all, fields(ride_id = %rating.ride_id))]
    async fn record_rating(&self, rating: &Rating) -> Result<bool, Error> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let inserted = tx
            .execute(
                sqlx::query(
                    "INSERT INTO ride_ratings (ride_id, driver_id, rider_id, stars, comment, created_at) VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (ride_id) DO NOTHING",
                )
                .bind(&rating.ride_id)
                .bind(&rating.driver_id)
                .bind(&rating.rider_id)
                .bind(rating.stars)
                .bind(&rating.comment)
                .bind(&rating.created_at),
            )
            .await?
            .rows_affected()
            == 1;

        if inserted {
            tx.execute(
                sqlx::query(
                    "INSERT INTO driver_stats (driver_id, rating_sum, rating_count) VALUES ($1, $2, 1)
                    ON CONFLICT (driver_id) DO UPDATE SET
                        rating_sum = driver_stats.rating_sum + EXCLUDED.rating_sum,
                        rating_count = driver_stats.rating_count + 1",
                )
                .bind(&rating.driver_id)
                .bind(rating.stars as i64),
            )
            .await?;
        }

        tx.commit().await?;

        Ok(inserted)
    }

    async fn get(&self, driver_id: Uuid) -> Result<DriverStats, Error> {
        let mut conn = self.pool.acquire().await?;

        let row = conn
            .fetch_optional(
                sqlx::query("SELECT * FROM driver_stats WHERE driver_id = $1").bind(&driver_id),
            )
            .await?;

        let Some(row) = row else {
            return Ok(DriverStats::new(driver_id));
        };

        Ok(DriverStats {
            driver_id,
            completed_rides: row.try_get("completed_rides")?,
            earnings: row.try_get("earnings")?,
            rating_sum: row.try_get("rating_sum")?,
            rating_count: row.try_get("rating_count")?,
        })
    }
}
