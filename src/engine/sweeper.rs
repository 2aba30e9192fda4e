//! Auto-cancels open rides nobody took within the pending TTL.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::Engine;
use crate::{
    auth::User,
    entities::{Ride, Status, Transition},
    error::Error,
    store::Guard,
};

/// Expires every open ride older than `pending_ttl`. Rides accepted in the meantime are left
/// alone by the conditional write.
#[tracing::instrument(skip_all)]
pub async fn expire_stale(engine: &Engine) -> Result<Vec<Ride>, Error> {
    let system = User::system();
    let ttl = chrono::Duration::from_std(engine.settings.pending_ttl)
        .map_err(|e| Error::config(format!("pending_ttl: {}", e)))?;
    let cutoff = Utc::now() - ttl;

    let open = engine
        .stores
        .rides
        .list_by_status(&[Status::Pending, Status::Negotiating])
        .await?;

    let mut expired = vec![];

    for ride in open.into_iter().filter(|ride| ride.created_at < cutoff) {
        engine.authorize(&system, "expire", ride.clone()).await?;

        let now = Utc::now();
        let seen = ride.version;
        let result = engine
            .commit(
                ride.id,
                Guard::new(Transition::Expire.allowed_from()),
                move |ride: &mut Ride| ride.expire(now),
                |stored: &Ride| {
                    stored.version > seen
                        && stored.reached(Transition::Expire)
                        && stored.cancelled_by.is_none()
                },
            )
            .await;

        match result {
            Ok(ride) => {
                tracing::info!("expired ride {} after {:?}", ride.id, engine.settings.pending_ttl);
                engine.publish_ride(&ride).await;
                expired.push(ride);
            }
            Err(err) if err.is_ride_already_taken() => {
                tracing::debug!("ride {} moved on before expiry", ride.id);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(expired)
}

pub fn spawn(engine: Arc<Engine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(engine.settings.sweep_interval);

        loop {
            interval.tick().await;

            match expire_stale(&engine).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!("sweeper expired {} rides", expired.len())
                }
                Ok(_) => {}
                Err(err) => tracing::error!("sweeper failed: {}", err),
            }
        }
    })
}
