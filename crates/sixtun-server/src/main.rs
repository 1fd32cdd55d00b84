//! sixtun broker daemon.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sixtun_broker::{AgentDriver, HttpAgentDriver};
use sixtun_proto::Signer;
use sixtun_server::config::Cli;
use sixtun_server::AppState;
use sixtun_store::{MemoryStore, RedisStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "sixtun_server=debug,sixtun_broker=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "sixtun_server=info,sixtun_broker=info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting sixtun broker");
    tracing::info!("listen: {}", cli.bind);
    tracing::info!("pool size: {}", cli.pool_size);

    let store: Arc<dyn Store> = match &cli.store_url {
        Some(url) => {
            tracing::info!("store: {url}");
            Arc::new(RedisStore::connect(url).await?)
        }
        None => {
            tracing::warn!("no store URL, state is in-memory and volatile");
            Arc::new(MemoryStore::new())
        }
    };

    let signer = Signer::new(&cli.secret);
    let agent: Arc<dyn AgentDriver> = Arc::new(HttpAgentDriver::new(
        signer.clone(),
        &cli.service_name,
        &cli.agent_name,
    )?);

    let state = AppState::new(
        store,
        agent,
        signer,
        &cli.host_name,
        &cli.service_name,
        &cli.peer_name,
        cli.pool_size,
    );

    if cli.admins.is_empty() {
        tracing::warn!("no admin principals configured, admin operations will be refused");
    }
    for uid in &cli.admins {
        state.registry.seed_admin(*uid).await?;
        tracing::info!("admin principal: {uid}");
    }

    sixtun_server::serve(state, cli.bind).await
}
