use async_trait::async_trait;
use sqlx::{types::Json, Executor, Pool, Row};
use tokio::sync::watch;
use uuid::Uuid;

use super::Database;
use crate::entities::{Ride, Status};
use crate::error::Error;
use crate::store::{guard_rejection, Guard, Mutation, RideLedger, Watchers};

pub struct PgRideLedger {
    pool: Pool<Database>,
    watchers: Watchers,
}

impl PgRideLedger {
    pub fn new(pool: Pool<Database>) -> Self {
        Self {
            pool,
            watchers: Watchers::new(),
        }
    }
}

#[async_trait]
impl RideLedger for PgRideLedger {
    #[tracing::instrument(skip_all, fields(ride_id = %ride.id))]
    async fn create(&self, ride: &Ride) -> Result<Uuid, Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO rides (id, status, version, created_at, data) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&ride.id)
            .bind(ride.status.name())
            .bind(ride.version)
            .bind(&ride.created_at)
            .bind(Json(ride)),
        )
        .await?;

        Ok(ride.id)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Ride, Error> {
        let mut conn = self.pool.acquire().await?;

        let Json(ride): Json<Ride> = conn
            .fetch_optional(sqlx::query("SELECT data FROM rides WHERE id = $1").bind(&id))
            .await?
            .ok_or_else(Error::ride_not_found)?
            .try_get("data")?;

        Ok(ride)
    }

    /// Optimistic compare-and-swap on (version, status). A lost swap re-reads the row and
    /// re-evaluates the guard, so only the first writer for a given version commits.
    #[tracing::instrument(skip(self, mutation))]
    async fn conditional_transition(
        &self,
        id: Uuid,
        guard: Guard,
        mutation: Mutation,
    ) -> Result<Ride, Error> {
        let mut conn = self.pool.acquire().await?;
        let allowed = guard.status_names();

        loop {
            let Json(mut ride): Json<Ride> = conn
                .fetch_optional(sqlx::query("SELECT data FROM rides WHERE id = $1").bind(&id))
                .await?
                .ok_or_else(Error::ride_not_found)?
                .try_get("data")?;

            if !guard.admits(&ride) {
                return Err(guard_rejection(&ride));
            }

            let expected = ride.version;
            mutation(&mut ride)?;
            ride.version = expected + 1;

            let result = conn
                .execute(
                    sqlx::query(
                        "UPDATE rides SET status = $3, version = $4, data = $5 WHERE id = $1 AND version = $2 AND status = ANY($6)",
                    )
                    .bind(&id)
                    .bind(expected)
                    .bind(ride.status.name())
                    .bind(ride.version)
                    .bind(Json(&ride))
                    .bind(&allowed),
                )
                .await?;

            if result.rows_affected() == 1 {
                self.watchers.notify(&ride);
                return Ok(ride);
            }

            tracing::info!("lost compare-and-swap at version {}, re-reading", expected);
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_status(&self, statuses: &[Status]) -> Result<Vec<Ride>, Error> {
        let names: Vec<String> = statuses.iter().map(|s| s.name().to_string()).collect();
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query("SELECT data FROM rides WHERE status = ANY($1) ORDER BY created_at ASC")
                    .bind(&names),
            )
            .await?;

        let mut rides = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let Json(ride): Json<Ride> = row.try_get("data")?;
            rides.push(ride);
        }

        Ok(rides)
    }

    // Only writes made through this process reach the channel; cross-replica updates travel
    // through the notifier.
    async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<Ride>, Error> {
        let ride = self.get(id).await?;
        Ok(self.watchers.subscribe(ride))
    }
}
