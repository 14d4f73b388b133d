/// Identity worker entry point
///
/// Runs the background side of the identity service:
/// - PostgreSQL connection pool and migrations
/// - Redis connection manager
/// - Email job worker (SMTP or no-op)
/// - Periodic purge of expired one-time tokens
use anyhow::{Context, Result};
use redis_utils::RedisPool;
use std::sync::Arc;
use std::time::Duration;
use storefront_identity::{
    boundary::install_panic_hook,
    config::Settings,
    db::{Database, PgDatabase, RepoError},
    jobs::{spawn_email_worker, RedisJobQueue, WorkerConfig},
    services::EmailService,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "storefront_identity=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();
    install_panic_hook();

    info!("Starting identity worker");

    let settings = Settings::load().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    settings.database.log_config();
    let db_pool = db_pool::create_pool(settings.database.clone())
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let redis_pool = RedisPool::connect(&settings.redis.url, settings.redis.connect_timeout())
        .await
        .context("Failed to connect to Redis")?;

    let email_service =
        EmailService::new(&settings.email).context("Failed to initialize email service")?;
    if email_service.is_enabled() {
        info!("Email service initialized with SMTP");
    } else {
        info!("Email service running in no-op mode (SMTP not configured)");
    }

    let queue = RedisJobQueue::new(
        redis_pool.manager(),
        &settings.worker.queue_name,
        settings.redis.command_timeout(),
    );
    let worker = spawn_email_worker(
        Arc::new(queue),
        Arc::new(email_service),
        WorkerConfig::from(&settings.worker),
    );

    let database: Arc<dyn Database> = Arc::new(PgDatabase::new(db_pool.clone()));
    let purge = spawn_token_purge(
        database,
        Duration::from_secs(settings.worker.purge_interval_secs.max(1)),
    );

    shutdown_signal().await;

    worker.abort();
    purge.abort();
    db_pool.close().await;

    info!("Identity worker shutdown complete");
    Ok(())
}

fn spawn_token_purge(db: Arc<dyn Database>, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "Starting expired token purge");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match purge_expired_tokens(db.as_ref()).await {
                Ok(0) => {}
                Ok(count) => info!(count, "purged expired tokens"),
                Err(err) => error!(error = %err, "expired token purge failed"),
            }
        }
    })
}

async fn purge_expired_tokens(db: &dyn Database) -> Result<u64, RepoError> {
    let mut store = db.acquire().await?;
    store.purge_expired_tokens().await
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
