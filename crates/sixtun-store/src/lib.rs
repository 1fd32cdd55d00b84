//! Key-value store abstraction for the tunnel broker.
//!
//! The broker keeps every server, session and index list in a flat key
//! space: string keys, hash keys and list keys. Only per-command atomicity
//! is guaranteed; multi-step invariants are maintained by the callers
//! (see `sixtun-broker`). Two backends are provided: [`MemoryStore`] for
//! tests and single-process deployments, and [`RedisStore`] for the real
//! thing.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("key {0} holds a value of the wrong type")]
    WrongType(String),

    #[error("store protocol error: {0}")]
    Protocol(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Flat key-value store with hashes, lists and atomic counters.
///
/// Each method is atomic on its own; nothing here spans commands. Values
/// are strings throughout, matching the wire representation the broker
/// reads back into typed records.
#[async_trait]
pub trait Store: Send + Sync {
    /// Connectivity check, run once per request before any other access.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increment an integer key, returning the new value.
    /// Missing keys start at 0.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Set multiple hash fields at once.
    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> StoreResult<()>;

    /// Fetch multiple hash fields; missing fields come back as `None`.
    async fn hget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>>;

    /// Append to the tail of a list.
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Prepend to the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Pop from the head of a list.
    async fn lpop(&self, key: &str) -> StoreResult<Option<String>>;
    /// Pop from the tail of a list.
    async fn rpop(&self, key: &str) -> StoreResult<Option<String>>;
    /// Remove every occurrence of `value`, returning the number removed.
    async fn lrem(&self, key: &str, value: &str) -> StoreResult<usize>;
    /// Inclusive range; a negative `stop` counts from the end (-1 = last).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;
    async fn llen(&self, key: &str) -> StoreResult<usize>;
}
