//! OpenSASE Fulfillment - pricing and order fulfillment service

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_fulfillment::api::{self, AppState};
use opensase_fulfillment::config::Config;
use opensase_fulfillment::db;
use opensase_fulfillment::domain::aggregates::{CatalogSeed, InMemoryAddressBook, InMemoryCatalog, Order};
use opensase_fulfillment::publisher::EventPublisher;
use opensase_fulfillment::CommerceCore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let (pool, catalog, addresses, orders) = match &config.database_url {
        Some(url) => {
            let pool = db::connect(url).await?;
            let snapshot = db::load_snapshot(&pool).await?;
            (Some(pool), snapshot.catalog, snapshot.addresses, snapshot.orders)
        }
        None => {
            let (catalog, addresses) = load_seed(&config)?;
            tracing::warn!("DATABASE_URL not set, running in memory");
            (None, catalog, addresses, Vec::<Order>::new())
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events will not be published");
                None
            }
        },
        None => None,
    };

    let core = CommerceCore::new(Arc::new(catalog), Arc::new(addresses), config.shipping_flat_rate).with_orders(orders)?;
    let state = AppState { core: Arc::new(core), db: pool, events: EventPublisher::new(nats, config.event_subject_prefix.clone()) };
    let app = api::router(state);

    tracing::info!("OpenSASE Fulfillment listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

fn load_seed(config: &Config) -> Result<(InMemoryCatalog, InMemoryAddressBook)> {
    let Some(path) = &config.seed_file else { return Ok((InMemoryCatalog::new(), InMemoryAddressBook::new())) };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: CatalogSeed = serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))?;
    Ok(seed.into_parts()?)
}
