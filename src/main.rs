//! FileHub storage daemon.
//!
//! Wires the metadata store, the blob backend and the services together,
//! then runs scheduled maintenance until shutdown.

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use filehub_core::config::AppConfig;
use filehub_core::error::AppError;
use filehub_core::traits::storage::StorageBackend;
use filehub_database::DatabasePool;
use filehub_service::Services;
use filehub_storage::StorageManager;
use filehub_worker::CronScheduler;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("FILEHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting FileHub v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Create data directories ──────────────────────────
    create_data_directories(&config).await?;

    // ── Step 2: Database connection + migrations ─────────────────
    let db = DatabasePool::connect(&config.database).await?;
    tracing::info!("Running database migrations...");
    filehub_database::migration::run_migrations(db.pool()).await?;
    tracing::info!("Database migrations complete");

    // ── Step 3: Storage backend ──────────────────────────────────
    let storage = Arc::new(StorageManager::from_config(&config.storage).await?);
    if !storage.health_check().await? {
        return Err(AppError::storage("Storage backend failed its health check"));
    }

    // ── Step 4: Services ─────────────────────────────────────────
    let services = Services::new(db.clone(), storage, &config);
    tracing::info!("Services initialized");

    // ── Step 5: Scheduled maintenance ────────────────────────────
    let mut scheduler = if config.worker.enabled {
        let executor = Arc::new(CronScheduler::default_executor(&services));
        let scheduler = CronScheduler::new(executor).await?;
        scheduler.register_default_tasks(&config.worker).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        tracing::info!("Scheduled maintenance disabled");
        None
    };

    // ── Step 6: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await?;
    }
    db.close().await;

    tracing::info!("FileHub shut down");
    Ok(())
}

/// Create the directories the local database and storage need
async fn create_data_directories(config: &AppConfig) -> Result<(), AppError> {
    let mut dirs = Vec::new();
    if config.storage.provider == "local" {
        dirs.push(config.storage.local.root_path.clone());
    }
    if let Some(path) = config.database.url.strip_prefix("sqlite://")
        && let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        dirs.push(parent.to_string_lossy().into_owned());
    }

    for dir in dirs {
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::with_source(
                filehub_core::ErrorKind::Configuration,
                format!("Failed to create directory '{dir}'"),
                e,
            )
        })?;
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
