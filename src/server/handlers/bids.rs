use axum::extract::{Extension, Json, Path};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::User;
use crate::entities::Bid;
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct CreateParams {
    bid_price: i64,
    message: Option<String>,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(ride_id): Path<Uuid>,
    Json(params): Json<CreateParams>,
) -> Result<Json<Bid>, Error> {
    let bid = api
        .post_bid(user, ride_id, params.bid_price, params.message)
        .await?;

    Ok(bid.into())
}

pub async fn list(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<Vec<Bid>>, Error> {
    let bids = api.list_bids(user, ride_id).await?;
    Ok(bids.into())
}
