//! Engram memory API server binary.
//!
//! Usage:
//!   engram-api --config config.toml
//!   engram-api --port 8080
//!   engram-api --port 8080 --bind 0.0.0.0
//!   engram-api --db ./data/engram.db
//!
//! # Environment Variables
//!
//! - `ENGRAM_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `ENGRAM_DB_PATH` - SQLite database path
//! - `ENGRAM_EMBEDDINGS_URL` - Embedding provider base URL
//! - `ENGRAM_EMBEDDINGS_API_KEY` - Embedding provider API key
//! - `ENGRAM_CORS_ORIGINS` - CORS allowed origins (comma-separated)

use engram_api::{serve, AppState, ServiceConfig};
use engram_memory::{db, HttpEmbeddingClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,engram_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments (simple for now)
    let args: Vec<String> = std::env::args().collect();
    let mut port: Option<u16> = None;
    let mut bind_addr: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut db_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = Some(args[i + 1].parse().expect("Invalid port number"));
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    bind_addr = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--db" => {
                if i + 1 < args.len() {
                    db_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Engram Memory API Server");
                println!();
                println!("Usage: engram-api [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --port <PORT>     Port to listen on (default: 8080)");
                println!(
                    "  -b, --bind <ADDR>     Bind address (default: 127.0.0.1, env: ENGRAM_BIND_ADDR)"
                );
                println!("  -c, --config <FILE>   Path to config.toml file");
                println!("      --db <FILE>       SQLite database path (env: ENGRAM_DB_PATH)");
                println!("  -h, --help            Show this help message");
                println!();
                println!("Environment variables:");
                println!("  ENGRAM_BIND_ADDR           Server bind address (overridden by --bind)");
                println!("  ENGRAM_DB_PATH             SQLite database path (overridden by --db)");
                println!("  ENGRAM_EMBEDDINGS_URL      Embedding provider base URL");
                println!("  ENGRAM_EMBEDDINGS_API_KEY  Embedding provider API key");
                println!("  ENGRAM_CORS_ORIGINS        CORS allowed origins (comma-separated)");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    // Load service configuration
    let config = if let Some(path) = config_path {
        tracing::info!(path = %path, "Loading configuration");
        ServiceConfig::from_file(&path)?
    } else {
        tracing::info!("Using default configuration");
        ServiceConfig::default()
    };

    // Flag > env var > config file > default
    let host = bind_addr
        .or_else(|| std::env::var("ENGRAM_BIND_ADDR").ok())
        .unwrap_or_else(|| config.server.bind_addr.clone());
    let port = port.unwrap_or(config.server.port);

    if host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0 — this exposes the API to all network interfaces. \
             Memory routes are guarded per instance, but a firewall is still recommended."
        );
    }

    let db_path = db_path
        .or_else(|| std::env::var("ENGRAM_DB_PATH").ok())
        .unwrap_or_else(|| config.database.path.clone());

    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = db::connect(&db_path).await?;

    let embeddings_url = std::env::var("ENGRAM_EMBEDDINGS_URL")
        .ok()
        .or_else(|| config.embeddings.api_url.clone());
    let embedder = Arc::new(HttpEmbeddingClient::new(
        embeddings_url,
        config.embeddings.model.clone(),
        config.resolve_embeddings_api_key(),
        config.embeddings.timeout_ms,
    ));

    let state = AppState::new(pool, embedder, config.memory.default_max_documents_mb);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    serve(Arc::new(state), addr).await?;

    Ok(())
}
