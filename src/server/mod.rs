mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, patch, post, put},
    Router,
};

use crate::api::API;
use crate::error::Error;
use crate::server::handlers::{bids, drivers, messages, places, quotes, rides};

pub type DynAPI = Arc<dyn API + Send + Sync>;

pub fn router(api: DynAPI) -> Router {
    Router::new()
        .route("/quotes", post(quotes::create))
        .route("/routes", post(places::route))
        .route("/places", get(places::search))
        .route("/places/reverse", get(places::reverse))
        .route("/rides", post(rides::create))
        .route("/rides/:id", get(rides::find))
        .route("/rides/:id/events", get(rides::events))
        .route("/rides/:id/accept", patch(rides::accept))
        .route("/rides/:id/arrive", patch(rides::arrive))
        .route("/rides/:id/start", patch(rides::start))
        .route("/rides/:id/complete", patch(rides::complete))
        .route("/rides/:id/cancel", patch(rides::cancel))
        .route("/rides/:id/emergency", patch(rides::trigger_emergency))
        .route("/rides/:id/emergency/clear", patch(rides::clear_emergency))
        .route("/rides/:id/rating", post(rides::rate))
        .route("/rides/:id/bids", get(bids::list).post(bids::create))
        .route("/rides/:id/messages", get(messages::list).post(messages::create))
        .route("/rides/:id/messages/read", patch(messages::mark_read))
        .route("/drivers/me/presence", put(drivers::update_presence))
        .route("/drivers/me/rides", get(drivers::open_rides))
        .route("/drivers/me/events", get(drivers::events))
        .route("/drivers/me/verification", post(drivers::request_verification))
        .route("/drivers/:id", get(drivers::profile))
        .route("/drivers/:id/stats", get(drivers::stats))
        .route("/drivers/:id/verification", patch(drivers::set_verification))
        .layer(Extension(api))
}

pub async fn serve(api: DynAPI, addr: SocketAddr) -> Result<(), Error> {
    let app = router(api);

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::unexpected(format!("server error: {}", e)))
}
