use std::sync::Arc;

use pasaje::config::{AppConfig, Backend};
use pasaje::db::{migrate, PgPool};
use pasaje::engine::{sweeper, Engine};
use pasaje::error::Error;
use pasaje::external::{Mapbox, MapsProvider, StraightLine};
use pasaje::logging::init_tracing;
use pasaje::notify::{Hub, Notifier, PgNotifier};
use pasaje::server::serve;
use pasaje::store::Stores;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = AppConfig::load()?;
    init_tracing(&config);

    let hub = Hub::new();
    let (stores, notifier): (Stores, Arc<dyn Notifier>) = match config.backend()? {
        Backend::Postgres => {
            let PgPool(pool) =
                PgPool::new(&config.database_url, config.database_max_connections).await?;
            migrate(&pool).await?;

            let stores = Stores::postgres(pool.clone());
            let (notifier, _relay) = PgNotifier::start(pool, hub, stores.clone()).await?;
            let notifier: Arc<dyn Notifier> = Arc::new(notifier);
            (stores, notifier)
        }
        Backend::Memory => {
            tracing::warn!("running with the in-memory backend; state is lost on exit");
            let notifier: Arc<dyn Notifier> = Arc::new(hub);
            (Stores::in_memory(), notifier)
        }
    };

    let maps: Arc<dyn MapsProvider> = match config.mapbox_access_token.as_deref() {
        Some(token) if !token.is_empty() => Arc::new(Mapbox::new(&config.mapbox_api_base, token)),
        _ => {
            tracing::warn!("no mapbox token; routing with straight lines");
            Arc::new(StraightLine)
        }
    };

    let engine = Arc::new(Engine::new(
        stores,
        notifier,
        maps,
        config.pricing()?,
        config.dispatch_settings()?,
    )?);

    let _sweeper = sweeper::spawn(engine.clone());

    serve(engine, config.socket_addr()?).await
}
