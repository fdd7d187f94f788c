pub mod connection;
#[cfg(test)]
pub mod memory;
pub mod store;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::{Client, bson::doc, options::ClientOptions};
use std::time::Duration;

use crate::config::Config;
use connection::Connector;

/// Connects to MongoDB with the pool settings from [`Config`].
#[derive(Debug, Clone)]
pub struct MongoConnector {
    uri: String,
    max_pool_size: u32,
    server_selection_timeout: Duration,
}

impl MongoConnector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            uri: config.mongodb_uri.clone(),
            max_pool_size: config.max_pool_size,
            server_selection_timeout: config.server_selection_timeout,
        }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Handle = Client;

    async fn connect(&self) -> Result<Client> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .context("Invalid MongoDB connection string")?;
        options.max_pool_size = Some(self.max_pool_size);
        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        let client = Client::with_options(options).context("Failed to create MongoDB client")?;

        // Ping to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("Failed to ping MongoDB")?;

        tracing::info!(
            max_pool_size = self.max_pool_size,
            "Successfully connected to MongoDB"
        );
        Ok(client)
    }
}
