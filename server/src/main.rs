pub mod api;
pub mod auth;
pub mod config;
pub mod db_mongo;
pub mod error;
pub mod health;
pub mod operation;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::db_mongo::{MongoConnector, store::{DocumentStore, MongoStore}};
use crate::operation::NamespaceDefaults;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn namespace_defaults(&self) -> NamespaceDefaults {
        NamespaceDefaults {
            database: self.config.default_database.clone(),
            collection: self.config.default_collection.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    if config.api_secret.is_none() {
        tracing::warn!("SHORTCUTS_API_KEY not set, every request will be rejected");
    }

    // Connects lazily on the first request.
    let store = MongoStore::new(MongoConnector::from_config(&config));
    let state = AppState::new(config, Arc::new(store));

    let listener = TcpListener::bind(&state.config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", state.config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, api::router(state)).await?;

    Ok(())
}
