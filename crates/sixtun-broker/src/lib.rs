//! Core allocation engine for the sixtun tunnel broker.
//!
//! The broker manages a pool of tunnel-endpoint servers and their
//! per-server session slots: registration and status transitions in
//! [`registry`], slot assignment and tunnel activation in [`pool`],
//! paginated views in [`listing`], and the remote tunnel agent behind
//! the [`agent::AgentDriver`] trait.
//!
//! All state lives in the [`sixtun_store::Store`]; nothing is cached in
//! process. Multi-step mutations take a per-server advisory lock, since
//! the store only guarantees per-command atomicity.

pub mod agent;
pub mod error;
pub mod keys;
pub mod listing;
pub mod model;
pub mod pool;
pub mod registry;

pub use agent::{AgentCtx, AgentDriver, HttpAgentDriver, ProbeResult};
pub use error::{BrokerError, BrokerResult};
pub use listing::Listing;
pub use model::{AdminStatus, OperStatus, Server, ServerMeta, Session, SessionAddrs};
pub use pool::SessionPool;
pub use registry::Registry;
