use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use taskpay_core::DocumentStorageConfig;
use taskpay_service::{build_router, ServiceConfig, ServiceState};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "taskpayd", version, about = "Taskpay wallet ledger REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8091
    #[arg(long, default_value = "127.0.0.1:8091", env = "TASKPAY_LISTEN")]
    listen: SocketAddr,
    /// Document storage backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "TASKPAY_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for document persistence.
    #[arg(long, env = "TASKPAY_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "TASKPAY_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Read cache TTL in seconds. 0 disables caching.
    #[arg(long, default_value_t = 30, env = "TASKPAY_CACHE_TTL_SECS")]
    cache_ttl_secs: u64,
    /// User ids granted the admin role.
    #[arg(long = "admin", env = "TASKPAY_ADMINS", value_delimiter = ',')]
    admins: Vec<String>,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<DocumentStorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => DocumentStorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            DocumentStorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => {
                DocumentStorageConfig::postgres(database_url, cli.pg_max_connections)
            }
            None => DocumentStorageConfig::Memory,
        },
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "taskpay_service=info,taskpay_core=info,info".to_string()
        }))
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;
    info!(storage = storage.label(), "resolved document storage");
    if cli.admins.is_empty() {
        tracing::warn!("no admins configured; admin-only operations will be denied");
    }
    let config = ServiceConfig {
        storage,
        cache_ttl_secs: cli.cache_ttl_secs,
        admins: cli.admins,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("taskpay-service REST listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
