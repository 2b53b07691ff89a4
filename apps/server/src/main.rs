//! McProxy gateway server binary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use mcproxy_gateway::{DependenciesBuilder, GatewayServer, GatewaySettings};
use mcproxy_storage::{
    default_database_path, generate_master_key, Database, FieldEncryptor,
    SqliteInstanceRepository, SqliteOAuthClientRepository, SqliteOAuthSessionRepository,
    SqliteOAuthTokenRepository, SqliteRequestLogRepository,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

const LOG_PREFIX: &str = "mcproxy";

fn logs_dir(settings: &GatewaySettings) -> PathBuf {
    settings.log_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mcproxy")
            .join("logs")
    })
}

/// Console plus daily-rolling file logging. Keep the guard alive.
fn init_tracing(settings: &GatewaySettings) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let logs_dir = logs_dir(settings);
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    // Creates files like: mcproxy.2026-01-22.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)
        .context("Failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG takes precedence
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(
                "info,mcproxy_core=debug,mcproxy_gateway=debug,mcproxy_storage=debug",
            )
        })
        .context("Invalid log filter")?;

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn encryptor(settings: &GatewaySettings) -> Result<FieldEncryptor> {
    match settings.master_key.as_deref() {
        Some(hex) => FieldEncryptor::from_hex(hex).context("Invalid MCPROXY_MASTER_KEY"),
        None => {
            warn!(
                "[Gateway] MCPROXY_MASTER_KEY not set, using an ephemeral key. \
                 Stored secrets will not survive a restart"
            );
            FieldEncryptor::new(&generate_master_key()?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = GatewaySettings::from_env().context("Invalid gateway configuration")?;
    let _guard = init_tracing(&settings)?;

    let db_path = settings
        .database_path
        .clone()
        .or_else(default_database_path)
        .context("No database path configured and no local data directory available")?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!("[Gateway] Database: {}", db_path.display());

    let db = Arc::new(Mutex::new(Database::open(&db_path)?));
    let encryptor = Arc::new(encryptor(&settings)?);

    let dependencies = DependenciesBuilder::new()
        .with_instances(Arc::new(SqliteInstanceRepository::new(
            db.clone(),
            encryptor.clone(),
        )))
        .with_oauth_clients(Arc::new(SqliteOAuthClientRepository::new(
            db.clone(),
            encryptor.clone(),
        )))
        .with_oauth_sessions(Arc::new(SqliteOAuthSessionRepository::new(
            db.clone(),
            encryptor.clone(),
        )))
        .with_oauth_tokens(Arc::new(SqliteOAuthTokenRepository::new(
            db.clone(),
            encryptor,
        )))
        .with_request_logs(Arc::new(SqliteRequestLogRepository::new(db)))
        .build()?;

    GatewayServer::new(settings, dependencies).run().await
}
