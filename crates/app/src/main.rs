mod departments;
mod employees;
mod pagetoken;
mod problem;
mod router;
mod telemetry;

use tracing::info;

use hrbank_storage::Database;
use hrbank_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;
    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let state = router::AppState::new(metrics, database);
    let app = router::app_router(state);

    info!(
        stage = "app",
        addr = %config.bind_addr,
        env = config.environment.as_str(),
        "starting HTTP server"
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
