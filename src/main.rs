use certmill::bootstrap;
use certmill::config::Config;
use certmill::infrastructure::observability;
use certmill::infrastructure::persistence::Database;
use certmill::shutdown::install_shutdown_handler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing and metrics
    let _observability = observability::init(&config)?;
    tracing::info!("Configuration loaded");

    // Initialize database connection
    let db = Database::connect(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Run migrations
    db.run_migrations().await?;
    tracing::info!("Database migrations applied");

    // Wire the pipeline
    let generator = bootstrap::default_generator(db.clone(), &config);
    let pipeline = bootstrap::build_pipeline(db, &config, generator);

    // Drain and exit cleanly on SIGTERM/SIGINT
    let shutdown = install_shutdown_handler();

    tracing::info!(
        "Certificate pipeline running ({} worker slot(s))",
        config.worker_concurrency
    );
    bootstrap::run_pipeline(&pipeline, shutdown).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
