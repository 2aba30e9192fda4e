use axum::extract::{Extension, Json, Path};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::User;
use crate::entities::ChatMessage;
use crate::error::Error;
use crate::server::DynAPI;

#[derive(Serialize, Deserialize)]
pub struct CreateParams {
    message: String,
}

#[derive(Serialize, Deserialize)]
pub struct MarkedRead {
    updated: u64,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(ride_id): Path<Uuid>,
    Json(params): Json<CreateParams>,
) -> Result<Json<ChatMessage>, Error> {
    let message = api.send_message(user, ride_id, params.message).await?;
    Ok(message.into())
}

pub async fn list(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessage>>, Error> {
    let messages = api.list_messages(user, ride_id).await?;
    Ok(messages.into())
}

pub async fn mark_read(
    Extension(api): Extension<DynAPI>,
    user: User,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<MarkedRead>, Error> {
    let updated = api.mark_read(user, ride_id).await?;
    Ok(MarkedRead { updated }.into())
}
