use async_trait::async_trait;
use sqlx::{postgres::PgRow, Executor, Pool, Row};
use uuid::Uuid;

use super::Database;
use crate::entities::Bid;
use crate::error::Error;
use crate::store::BidBook;

pub struct PgBidBook {
    pool: Pool<Database>,
}

impl PgBidBook {
    pub fn new(pool: Pool<Database>) -> Self {
        Self { pool }
    }
}

fn bid_from_row(row: &PgRow) -> Result<Bid, Error> {
    Ok(Bid {
        id: row.try_get("id")?,
        ride_id: row.try_get("ride_id")?,
        user_id: row.try_get("user_id")?,
        bid_price: row.try_get("bid_price")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl BidBook for PgBidBook {
    #[tracing::instrument(skip_all, fields(ride_id = %bid.ride_id, bid_id = %bid.id))]
    async fn post(&self, bid: &Bid) -> Result<Bid, Error> {
        let mut conn = self.pool.acquire().await?;

        conn.execute(
            sqlx::query(
                "INSERT INTO bids (id, ride_id, user_id, bid_price, message, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&bid.id)
            .bind(&bid.ride_id)
            .bind(&bid.user_id)
            .bind(bid.bid_price)
            .bind(&bid.message)
            .bind(&bid.created_at),
        )
        .await?;

        Ok(bid.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Bid, Error> {
        let mut conn = self.pool.acquire().await?;

        let row = conn
            .fetch_optional(sqlx::query("SELECT * FROM bids WHERE id = $1").bind(&id))
            .await?
            .ok_or_else(Error::bid_not_found)?;

        bid_from_row(&row)
    }

    async fn list_for(&self, ride_id: Uuid) -> Result<Vec<Bid>, Error> {
        let mut conn = self.pool.acquire().await?;

        let rows = conn
            .fetch_all(
                sqlx::query("SELECT * FROM bids WHERE ride_id = $1 ORDER BY created_at ASC, seq ASC")
                    .bind(&ride_id),
            )
            .await?;

        rows.iter().map(bid_from_row).collect()
    }
}
