use std::sync::Arc;

use crate::config::Config;
use crate::lock::RedisUserLock;
use crate::store::MongoStore;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

pub mod catalog_seed;
pub mod progression_service;

pub use progression_service::{EngineSettings, ProgressionService};

/// Production wiring: MongoDB store, Redis lock and the service over them.
pub struct AppState {
    pub config: Config,
    pub store: Arc<MongoStore>,
    pub redis: ConnectionManager,
    pub progression: Arc<ProgressionService>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(MongoStore::new(mongo_client, &config.mongo_database));
        // Mongo may still be electing a primary right after startup.
        retry_async_with_config(RetryConfig::default(), || store.ensure_indexes()).await?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let lock = Arc::new(RedisUserLock::new(redis.clone(), config.lock_ttl()));
        let progression = Arc::new(ProgressionService::new(
            store.clone(),
            lock,
            EngineSettings::from_config(&config),
        ));

        Ok(Self {
            config,
            store,
            redis,
            progression,
        })
    }
}
