use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use username_registry::clock::{Clock, SystemClock};
use username_registry::config::{Config, StoreBackend};
use username_registry::db::Db;
use username_registry::net::http;
use username_registry::{MemoryRegistryStore, PgRegistryStore, Registry, RegistryStore};

#[derive(Debug, Parser)]
#[command(name = "username-registry", about = "Username claim and rename service")]
struct Args {
    /// TOML configuration file; environment variables are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep all state in memory (nothing survives a restart)
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if args.memory {
        cfg.store = StoreBackend::Memory;
    }
    let cfg = Arc::new(cfg);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cfg.store {
        StoreBackend::Postgres => {
            let db = Arc::new(Db::new(&cfg.database_url)?);
            db.init().await?;
            let store = Arc::new(PgRegistryStore::new(db, cfg.retry()));
            run(cfg, store, clock).await
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, claims are lost on restart");
            let store = Arc::new(MemoryRegistryStore::new(clock.clone(), cfg.retry()));
            run(cfg, store, clock).await
        }
    }
}

async fn run<S: RegistryStore>(cfg: Arc<Config>, store: Arc<S>, clock: Arc<dyn Clock>) -> anyhow::Result<()> {
    let addr: SocketAddr = cfg.http_addr.parse()?;
    let registry = Arc::new(Registry::new(cfg.clone(), store, clock));

    tracing::info!(%addr, store = ?cfg.store, cooldown_days = cfg.cooldown_days, "username registry listening");
    http::serve(addr, registry).await?;

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, prelude::*};

    color_eyre::install().map_err(|e| anyhow::anyhow!("cannot install error hooks: {e}"))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::uptime()),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    Ok(())
}
