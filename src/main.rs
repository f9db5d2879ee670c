//! Storefront Order & Payment Engine - HTTP service

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_engine::{
    api,
    config::Config,
    gateway::{HttpGateway, SignatureVerifier},
    publisher::{EventPublisher, LogPublisher, NatsPublisher},
    services::Services,
    store::{MemoryStore, PgStore, Store},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, config.database_max_connections).await.context("connecting to database")?;
            pg.migrate().await.context("running migrations")?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsPublisher::new(client, "storefront")),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, domain events will only be logged");
                Arc::new(LogPublisher)
            }
        },
        None => Arc::new(LogPublisher),
    };

    let gw = &config.gateway;
    let gateway = HttpGateway::new(&gw.api_base, &gw.key_id, &gw.key_secret, gw.timeout)?;
    let services = Services::new(
        store,
        Arc::new(gateway),
        publisher,
        SignatureVerifier::new(&gw.key_secret),
        config.checkout.clone(),
        config.payments.clone(),
    );

    let _sweeper = services.payments.clone().spawn_sweeper();
    let app = api::router(services);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("🚀 Storefront engine listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
