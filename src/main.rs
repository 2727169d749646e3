use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod errors;
mod handlers;
mod meta;
mod models;
mod range;
mod routes;
mod services;
mod storage;

use cache::TtlCache;
use meta::driver::MetaDriver;
use meta::memory::MemoryDriver;
use meta::sqlite::SqliteDriver;
use meta::store::MetaStore;
use services::file_service::FileService;
use storage::bucket::BucketBackend;
use storage::telegram::TelegramBackend;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting filebed with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Bind the metadata driver ---
    let driver: Arc<dyn MetaDriver> = match &cfg.database_url {
        Some(db_url) => {
            tracing::debug!("Connecting using raw URL => {}", db_url);

            // Extract the local file path SQLx will use
            let db_path = db_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("file:");
            tracing::debug!("Interpreted SQLite path => {}", db_path);

            // Create parent directory if needed
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.exists() {
                    fs::create_dir_all(parent)?;
                    tracing::info!("Created missing directory {:?}", parent);
                }
            }

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await?;
            Arc::new(SqliteDriver::new(Arc::new(pool)))
        }
        None => {
            tracing::warn!(
                "No FILEBED_DATABASE_URL bound; metadata lives in the in-memory emulator \
                 and will not survive a restart"
            );
            Arc::new(MemoryDriver::new())
        }
    };

    // --- Bootstrap the schema (fatal on exhaustion) ---
    let store = MetaStore::new(driver);
    store.ensure_ready().await?;

    // --- Storage backends ---
    let bucket = Arc::new(BucketBackend::new(&cfg.storage_dir));
    let telegram = match (&cfg.telegram_token, &cfg.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Some(Arc::new(TelegramBackend::new(token, chat_id))),
        _ => {
            tracing::info!("Telegram credentials absent; chat-transport backend disabled");
            None
        }
    };

    // --- Initialize core service ---
    let file_cache = Arc::new(TtlCache::new(
        Duration::from_secs(cfg.cache_ttl_secs),
        cfg.cache_capacity,
    ));
    let service = FileService::new(
        store,
        bucket,
        telegram,
        file_cache,
        cfg.base_url.clone(),
        cfg.chunk_threshold,
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
