//! HTTP front of the sixtun broker.
//!
//! Every operation is a POST of a signed JSON envelope; results travel
//! in-band as [`sixtun_proto::ErrNo`] codes, the HTTP status stays 200
//! for anything that produced an envelope. Admin operations live under
//! `/v/`, session operations under `/s/`.

pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use sixtun_broker::{AgentDriver, Listing, Registry, SessionPool};
use sixtun_proto::Signer;
use sixtun_store::Store;

use crate::stats::Stats;

/// Application state shared across handlers.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
    pub pool: Arc<SessionPool>,
    pub listing: Arc<Listing>,
    pub agent: Arc<dyn AgentDriver>,
    pub signer: Signer,
    pub stats: Stats,
    pub started_at: Instant,
    /// Reported in every response envelope.
    pub host_name: String,
    /// Our identity on the wire.
    pub service_name: String,
    /// Identity callers must present.
    pub peer_name: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        agent: Arc<dyn AgentDriver>,
        signer: Signer,
        host_name: &str,
        service_name: &str,
        peer_name: &str,
        pool_size: i64,
    ) -> Arc<Self> {
        let registry = Arc::new(Registry::new(store.clone(), pool_size));
        let pool = Arc::new(SessionPool::new(store.clone(), agent.clone()));
        let listing = Arc::new(Listing::new(store.clone(), registry.clone(), pool.clone()));

        Arc::new(Self {
            store,
            registry,
            pool,
            listing,
            agent,
            signer,
            stats: Stats::new(),
            started_at: Instant::now(),
            host_name: host_name.to_string(),
            service_name: service_name.to_string(),
            peer_name: peer_name.to_string(),
        })
    }
}

/// Build the router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v/{op}", post(dispatch::admin))
        .route("/s/{op}", post(dispatch::session))
        .route("/status", post(dispatch::status))
        .fallback(dispatch::unknown)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>, bind: std::net::SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);

    info!("listening on {bind}");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
