use axum::extract::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::User;
use crate::entities::{Coordinates, Quote, VehicleCategory};
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct CreateParams {
    origin: Coordinates,
    destination: Coordinates,
    category: VehicleCategory,
    #[serde(default)]
    stops: Vec<Coordinates>,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Json(params): Json<CreateParams>,
) -> Result<Json<Quote>, Error> {
    let quote = api
        .quote(
            user,
            params.origin,
            params.destination,
            params.category,
            params.stops,
        )
        .await?;

    Ok(quote.into())
}
