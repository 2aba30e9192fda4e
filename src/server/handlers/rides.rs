use axum::extract::{Extension, Json, Path};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events;
use crate::api::{Acceptance, NewRide};
use crate::auth::User;
use crate::entities::{Coordinates, DriverStats, Ride};
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct CancelParams {
    expected_version: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct EmergencyParams {
    reason: String,
    coordinates: Option<Coordinates>,
}

#[derive(Serialize, Deserialize)]
pub struct RatingParams {
    stars: i16,
    comment: Option<String>,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<NewRide>,
) -> Result<Json<Ride>, Error> {
    let ride = api.create_ride(user, params).await?;
    Ok(ride.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.find_ride(user, id).await?;
    Ok(ride.into())
}

pub async fn accept(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(acceptance): Json<Acceptance>,
) -> Result<Json<Ride>, Error> {
    let ride = api.accept(user, id, acceptance).await?;
    Ok(ride.into())
}

pub async fn arrive(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.report_arrival(user, id).await?;
    Ok(ride.into())
}

pub async fn start(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.report_start(user, id).await?;
    Ok(ride.into())
}

pub async fn complete(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.report_completion(user, id).await?;
    Ok(ride.into())
}

pub async fn cancel(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    params: Option<Json<CancelParams>>,
) -> Result<Json<Ride>, Error> {
    let expected_version = params.and_then(|Json(params)| params.expected_version);
    let ride = api.cancel_ride(user, id, expected_version).await?;
    Ok(ride.into())
}

pub async fn trigger_emergency(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(params): Json<EmergencyParams>,
) -> Result<Json<Ride>, Error> {
    let ride = api
        .trigger_emergency(user, id, params.reason, params.coordinates)
        .await?;
    Ok(ride.into())
}

pub async fn clear_emergency(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, Error> {
    let ride = api.clear_emergency(user, id).await?;
    Ok(ride.into())
}

pub async fn rate(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
    Json(params): Json<RatingParams>,
) -> Result<Json<DriverStats>, Error> {
    let stats = api.rate_ride(user, id, params.stars, params.comment).await?;
    Ok(stats.into())
}

pub async fn events(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let (ride, subscription) = api.watch_ride(user, id).await?;

    Ok(events::stream(Some(("ride_updated", ride)), subscription))
}
