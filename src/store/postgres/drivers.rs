use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Pool, Row};
use uuid::Uuid;

use super::Database;
use crate::entities::{DriverProfile, Verification};
use crate::error::Error;
use crate::store::DriverRegistry;

pub struct PgDriverRegistry {
    pool: Pool<Database>,
}

impl PgDriverRegistry {
    pub fn new(pool: Pool<Database>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DriverRegistry for PgDriverRegistry {
    async fn get(&self, driver_id: Uuid) -> Result<DriverProfile, Error> {
        let mut conn = self.pool.acquire().await?;

        let row = conn
            .fetch_optional(
                sqlx::query(
                    "SELECT verification_status, updated_at FROM driver_profiles WHERE driver_id = $1",
                )
                .bind(&driver_id),
            )
            .await?;

        let Some(row) = row else {
            return Ok(DriverProfile::new(driver_id));
        };

        let status: String = row.try_get("verification_status")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(DriverProfile {
            driver_id,
            verification: Verification::parse(&status)?,
            updated_at,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn set_verification(
        &self,
        driver_id: Uuid,
        verification: Verification,
    ) -> Result<DriverProfile, Error> {
        let mut conn = self.pool.acquire().await?;
        let updated_at = Utc::now();

        conn.execute(
            sqlx::query(
                "INSERT INTO driver_profiles (driver_id, verification_status, updated_at) VALUES ($1, $2, $3)
                ON CONFLICT (driver_id) DO UPDATE SET
                    verification_status = EXCLUDED.verification_status,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(&driver_id)
            .bind(verification.name())
            .bind(&updated_at),
        )
        .await?;

        Ok(DriverProfile {
            driver_id,
            verification,
            updated_at,
        })
    }
}
