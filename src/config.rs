use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Payload sizes above this are split into chunks of this size.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 5_000_000;

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Public URL prefix files are served under.
    pub base_url: String,
    /// Metadata database; `None` falls back to the in-memory emulator.
    pub database_url: Option<String>,
    /// Root directory of the bucket backend.
    pub storage_dir: String,
    /// Telegram bot credentials; both must be present for the chat-transport
    /// backend to be available.
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub chunk_threshold: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Personal file-hosting service")]
pub struct Args {
    /// Host to bind to (overrides FILEBED_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEBED_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Public URL prefix (overrides FILEBED_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Metadata database URL (overrides FILEBED_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for bucket-backed objects (overrides FILEBED_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Chunk threshold in bytes (overrides FILEBED_CHUNK_THRESHOLD)
    #[arg(long)]
    pub chunk_threshold: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FILEBED_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("FILEBED_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FILEBED_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading FILEBED_PORT"),
        };
        let env_storage =
            env::var("FILEBED_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FILEBED_DATABASE_URL").ok();
        let env_base_url = env::var("FILEBED_BASE_URL").ok();
        let env_threshold = match env::var("FILEBED_CHUNK_THRESHOLD") {
            Ok(value) => Some(
                value
                    .parse::<u64>()
                    .with_context(|| format!("parsing FILEBED_CHUNK_THRESHOLD value `{}`", value))?,
            ),
            Err(_) => None,
        };
        let cache_ttl_secs = match env::var("FILEBED_CACHE_TTL_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing FILEBED_CACHE_TTL_SECS value `{}`", value))?,
            Err(_) => DEFAULT_CACHE_TTL_SECS,
        };

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let base_url = args
            .base_url
            .or(env_base_url)
            .unwrap_or_else(|| format!("http://{}:{}", host, port));

        let cfg = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            database_url: args.database_url.or(env_db),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            telegram_token: env::var("FILEBED_TELEGRAM_TOKEN").ok(),
            telegram_chat_id: env::var("FILEBED_TELEGRAM_CHAT_ID").ok(),
            chunk_threshold: args
                .chunk_threshold
                .or(env_threshold)
                .unwrap_or(DEFAULT_CHUNK_THRESHOLD),
            cache_ttl_secs,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            host,
            port,
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
