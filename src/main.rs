use axum::{routing::get, Router};
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{trace::TraceLayer, cors::{Any, CorsLayer}};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod catalog;
mod certificate;
mod config;
mod db;
mod error;
mod models;
mod progress;
mod quiz;
mod rest;
mod routes;
mod session;
mod store;

use config::{Backend, Config};
use store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "firesafe_training=info,axum=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::from_env()?;
    let store: Arc<dyn Store> = match &cfg.backend {
        Backend::Postgres { url } => Arc::new(db::PgStore::new(db::connect(url).await?)),
        Backend::Rest { url, key } => Arc::new(rest::RestStore::new(url.as_str(), key.as_str())),
        Backend::Memory => {
            tracing::warn!("using the in-memory store, nothing survives a restart");
            Arc::new(store::MemoryStore::new())
        }
    };

    if cfg.seed_catalog {
        catalog::seed_if_empty(store.as_ref(), cfg.seed_dir.as_deref()).await?;
    }

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(store))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", cfg.port);

    axum::serve(listener, app).await?;
    Ok(())
}
