use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use pillwise::app::App;
use pillwise::catalog::ScheduleCatalog;
use pillwise::config;
use pillwise::db;
use pillwise::dispatch::LogDispatch;
use pillwise::scheduler::engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("Pillwise starting v{}", config::APP_VERSION);

    // Catalog first — no slots means no safe schedule to run, so this is fatal.
    let catalog = match std::env::var_os("PILLWISE_CATALOG") {
        Some(path) => ScheduleCatalog::from_path(Path::new(&path))?,
        None => ScheduleCatalog::embedded_default()?,
    };
    tracing::info!(slots = catalog.len(), "schedule catalog loaded");

    std::fs::create_dir_all(config::app_data_dir())?;
    let conn = db::open_database(&config::database_path())?;

    let app = Arc::new(App::new(conn, catalog, Box::new(LogDispatch)));

    // Self-heal after downtime spanning a day boundary
    let seeded = app.seed_today()?;
    tracing::info!(seeded, "today's dose records seeded");

    let ticker = engine::spawn_ticker(app.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Pillwise shutting down");
    ticker.abort();

    Ok(())
}
