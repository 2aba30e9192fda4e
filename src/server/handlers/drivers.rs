use axum::extract::{Extension, Json, Path};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events;
use crate::auth::User;
use crate::entities::{Coordinates, DriverProfile, DriverStats, Presence, Ride, Verification};
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct PresenceParams {
    is_online: bool,
    coordinates: Option<Coordinates>,
}

#[derive(Serialize, Deserialize)]
pub struct VerificationParams {
    verification: Verification,
}

pub async fn update_presence(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<PresenceParams>,
) -> Result<Json<Presence>, Error> {
    let presence = api
        .update_presence(user, params.is_online, params.coordinates)
        .await?;

    Ok(presence.into())
}

pub async fn open_rides(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<Json<Vec<Ride>>, Error> {
    let rides = api.open_rides(user).await?;
    Ok(rides.into())
}

pub async fn stats(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(driver_id): Path<Uuid>,
) -> Result<Json<DriverStats>, Error> {
    let stats = api.driver_stats(user, driver_id).await?;
    Ok(stats.into())
}

pub async fn events(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<impl IntoResponse, Error> {
    let subscription = api.watch_dispatch(user).await?;

    Ok(events::stream::<Ride>(None, subscription))
}

pub async fn request_verification(
    Extension(api): Extension<DynAPI>,
    user: User,
) -> Result<Json<DriverProfile>, Error> {
    let profile = api.request_verification(user).await?;
    Ok(profile.into())
}

pub async fn profile(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(driver_id): Path<Uuid>,
) -> Result<Json<DriverProfile>, Error> {
    let profile = api.driver_profile(user, driver_id).await?;
    Ok(profile.into())
}

pub async fn set_verification(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(driver_id): Path<Uuid>,
    Json(params): Json<VerificationParams>,
) -> Result<Json<DriverProfile>, Error> {
    let profile = api
        .set_verification(user, driver_id, params.verification)
        .await?;

    Ok(profile.into())
}
