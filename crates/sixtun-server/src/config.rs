//! Command line and environment configuration.

use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sixtun-server",
    about = "Tunnel broker for IPv6-in-IPv4 sessions",
    version,
    long_about = "Central broker of the sixtun platform. Manages tunnel-endpoint\n\
                  servers and their session pools, and drives the per-server\n\
                  tunnel agents over the signed control protocol.\n\n\
                  Examples:\n  \
                  # In-memory store, one admin principal\n  \
                  sixtun-server --secret s3cret --admin 9000\n\n  \
                  # Redis-backed, listening on all interfaces\n  \
                  sixtun-server \\\n    \
                  --bind 0.0.0.0:8034 \\\n    \
                  --store-url redis://127.0.0.1:6379/0 \\\n    \
                  --secret s3cret --admin 9000 --admin 9001"
)]
pub struct Cli {
    /// Listen address
    #[arg(short = 'b', long, default_value = "127.0.0.1:8034", env = "SIXTUN_BIND")]
    pub bind: SocketAddr,

    /// Store URL (redis://...). Without it state lives in process
    /// memory and is lost on restart.
    #[arg(long, env = "SIXTUN_STORE_URL")]
    pub store_url: Option<String>,

    /// Shared HMAC secret for the control protocol
    #[arg(long, env = "SIXTUN_SECRET")]
    pub secret: String,

    /// Host name reported in response envelopes
    #[arg(long, default_value = "sixtun-broker", env = "SIXTUN_HOST_NAME")]
    pub host_name: String,

    /// Our service identity, sent with every signed message
    #[arg(long, default_value = "sixtun", env = "SIXTUN_SERVICE_NAME")]
    pub service_name: String,

    /// Service identity callers must present
    #[arg(long, default_value = "sixtun-web", env = "SIXTUN_PEER_NAME")]
    pub peer_name: String,

    /// Service identity tunnel agents must present
    #[arg(long, default_value = "sixtun-agent", env = "SIXTUN_AGENT_NAME")]
    pub agent_name: String,

    /// Session slots seeded per new server
    #[arg(long, default_value_t = 1000, env = "SIXTUN_POOL_SIZE")]
    pub pool_size: i64,

    /// Admin principal ids (can be specified multiple times)
    #[arg(
        long = "admin",
        value_name = "UID",
        env = "SIXTUN_ADMINS",
        value_delimiter = ','
    )]
    pub admins: Vec<i64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
