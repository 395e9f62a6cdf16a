use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use progression_engine::{config::Config, services::catalog_seed, store::MongoStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "progression_engine=info,seed_achievements=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load configuration")?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let store = MongoStore::new(mongo_client, &config.mongo_database);

    let written = catalog_seed::bootstrap(&config, &store).await?;
    tracing::info!(
        "Seeded {} achievements into {}",
        written,
        config.mongo_database
    );

    Ok(())
}
