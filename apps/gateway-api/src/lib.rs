pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use auth::jwt::JwtVerifier;
use auth::{CredentialVerifier, TrustedUserVerifier};
use config::Config;
use db::kv::{KeyValueStore, MemoryStore, RedisStore};
use error::StoreError;
use gateway::delivery::{Deliverable, PushApiClient, RoutedDelivery};
use gateway::fanout::BroadcastEngine;
use gateway::registry::ConnectionRegistry;
use gateway::session::SessionTable;

/// Shared application state: one gateway instance. Created at startup,
/// torn down by [`gateway::server::shutdown`].
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionTable>,
    pub broadcast: Arc<BroadcastEngine>,
    pub verifier: Arc<dyn CredentialVerifier>,
}

impl AppState {
    /// Wire up a gateway over an explicit store and verifier.
    pub fn new(
        config: Config,
        kv: Arc<dyn KeyValueStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ConnectionRegistry::new(kv, config.store_timeout));
        let sessions = Arc::new(SessionTable::new(config.outbound_buffer));

        let delivery: Arc<dyn Deliverable> = match &config.push_api_url {
            Some(url) => Arc::new(RoutedDelivery::new(
                sessions.clone(),
                PushApiClient::new(url),
            )),
            None => sessions.clone(),
        };
        let broadcast = Arc::new(BroadcastEngine::new(registry.clone(), delivery));

        Self {
            config,
            registry,
            sessions,
            broadcast,
            verifier,
        }
    }

    /// Build the store and verifier the configuration asks for.
    pub async fn from_config(config: Config) -> Result<Self, StoreError> {
        let kv: Arc<dyn KeyValueStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                tracing::info!("REDIS_URL not set, using in-memory connection registry");
                Arc::new(MemoryStore::new())
            }
        };

        if config.redis_url.is_some() && config.push_api_url.is_none() {
            tracing::warn!(
                "REDIS_URL set without PUSH_API_URL, connections held by other processes \
                 will not receive broadcasts"
            );
        }

        let verifier: Arc<dyn CredentialVerifier> = match &config.auth_secret {
            Some(secret) => Arc::new(JwtVerifier::new(
                secret,
                config.auth_issuer.as_deref(),
                config.auth_audience.as_deref(),
            )),
            None => {
                tracing::warn!("AUTH_SECRET not set, trusting client-supplied user ids");
                Arc::new(TrustedUserVerifier)
            }
        };

        Ok(Self::new(config, kv, verifier))
    }
}
