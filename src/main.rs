use schemaplane::config::AppConfig;
use schemaplane::store::PostgresStore;
use schemaplane::{seed, ControlPlane};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info) // Default to Info for everything
        .filter_module("sqlx", LevelFilter::Warn) // Suppress sqlx Debug logs
        .parse_default_env()
        .init();

    log::info!("schemaplane: schema bootstrap and migration control plane");

    // Load configuration
    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: migrate={}, {} migrations configured",
        config.migrations.migrate,
        config.migrations.order.len()
    );

    log::info!("Connecting to PostgreSQL...");
    let database_url = config.database_url()?;
    let postgres_store = PostgresStore::new(&database_url, config.max_connections()).await?;
    postgres_store.migrate().await?;

    let plane = ControlPlane::new(Arc::new(postgres_store), &config);

    // Register demo collections (optional)
    if config.seed.enabled {
        log::info!("Registering demo collections...");
        seed::register_demo_components(&plane.registry);
    }

    // A deadlocked bootstrap aborts startup here
    plane.start().await?;

    if config.seed.enabled {
        seed::load_seed_data(&plane.overrides).await?;
    }

    log::info!(
        "Ready: {} collections registered",
        plane.registry.collections().len()
    );

    Ok(())
}
