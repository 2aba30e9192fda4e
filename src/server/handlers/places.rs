use axum::extract::{Extension, Json, Query};
use serde::{Deserialize, Serialize};

use crate::auth::User;
use crate::entities::{Coordinates, Location, VehicleCategory};
use crate::error::Error;
use crate::external::{Place, RouteSummary};
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct SearchParams {
    q: String,
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Serialize, Deserialize)]
pub struct ReverseParams {
    lat: f64,
    lng: f64,
}

#[derive(Serialize, Deserialize)]
pub struct RouteParams {
    points: Vec<Coordinates>,
    category: VehicleCategory,
}

pub async fn search(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Place>>, Error> {
    let proximity = params
        .lat
        .zip(params.lng)
        .map(|(lat, lng)| Coordinates::new(lat, lng));

    let places = api.search_places(user, params.q, proximity).await?;

    Ok(places.into())
}

pub async fn reverse(
    Extension(api): Extension<DynAPI>,
    user: User,
    Query(params): Query<ReverseParams>,
) -> Result<Json<Location>, Error> {
    let location = api
        .reverse_geocode(user, Coordinates::new(params.lat, params.lng))
        .await?;

    Ok(location.into())
}

pub async fn route(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<RouteParams>,
) -> Result<Json<RouteSummary>, Error> {
    let route = api.route(user, params.points, params.category).await?;

    Ok(route.into())
}
