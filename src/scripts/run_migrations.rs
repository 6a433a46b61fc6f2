use anyhow::Result;
use schemaplane::config::AppConfig;
use schemaplane::store::PostgresStore;
use schemaplane::{ControlPlane, MigrationOutcome};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("sqlx", log::LevelFilter::Warn)
        .init();

    let config = AppConfig::load()?;
    let database_url = config.database_url()?;
    let store = PostgresStore::new(&database_url, config.max_connections()).await?;
    store.migrate().await?;

    log::info!("Connected to database. Starting migrations...");

    let plane = ControlPlane::new(Arc::new(store), &config);
    // Migrations that read collections need them compiled
    plane.boot().await?;

    let report = loop {
        let report = plane.run_migrations().await;
        if report.acquired || report.error.is_some() {
            break report;
        }
        log::info!("Another process is migrating; waiting for it to finish");
        plane.migrations.wait_for_release().await;
    };

    for (name, outcome) in &report.results {
        match outcome {
            MigrationOutcome::Failed(reason) => log::error!("{}: failed ({})", name, reason),
            other => log::info!("{}: {:?}", name, other),
        }
    }

    if let Some(error) = report.error {
        anyhow::bail!("Migration run aborted: {}", error);
    }

    log::info!("All migrations processed");
    Ok(())
}
