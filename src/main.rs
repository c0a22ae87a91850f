use std::{error::Error, sync::Arc};

use catalog_api::{
    api::{create_api_router, AppState},
    config::Config,
    entities::{bootstrap_admin, connect, setup_schema},
    jobs::JobQueue,
    mailer::LogMailer,
};
use chrono::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let db = connect(&config.database_url).await?;
    setup_schema(&db).await?;
    if let Some(seed) = &config.admin {
        bootstrap_admin(&db, seed).await?;
    }

    let db = Arc::new(db);
    let jobs = JobQueue::start(
        db.clone(),
        config.job_queue_capacity,
        Duration::seconds(config.job_retention_secs),
    );
    let config = Arc::new(config);

    let app = create_api_router(AppState {
        db,
        config: config.clone(),
        mailer: Arc::new(LogMailer),
        jobs,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "Running");
    axum::serve(listener, app).await?;

    Ok(())
}
