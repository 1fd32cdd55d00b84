//! Redis store backend.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisError};
use tracing::info;

use crate::{Store, StoreError, StoreResult};

/// Redis-backed [`Store`] using a multiplexed connection manager.
///
/// The manager reconnects on its own; callers still see the per-request
/// `ping` fail when the server is genuinely unreachable.
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://:password@127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(map_err)?;
        info!("connected to redis store");
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn map_err(e: RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Protocol(e.to_string())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut con = self.conn();
        redis::cmd("PING")
            .query_async::<()>(&mut con)
            .await
            .map_err(map_err)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn().get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn().set(key, value).await.map_err(map_err)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.conn().exists(key).await.map_err(map_err)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.conn().incr(key, 1).await.map_err(map_err)
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> StoreResult<()> {
        self.conn().hset_multiple(key, fields).await.map_err(map_err)
    }

    async fn hget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for f in fields {
            cmd.arg(*f);
        }
        let mut con = self.conn();
        cmd.query_async(&mut con).await.map_err(map_err)
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn().rpush(key, value).await.map_err(map_err)
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn().lpush(key, value).await.map_err(map_err)
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn().lpop(key, None).await.map_err(map_err)
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn().rpop(key, None).await.map_err(map_err)
    }

    async fn lrem(&self, key: &str, value: &str) -> StoreResult<usize> {
        // count 0 removes every occurrence
        self.conn().lrem(key, 0, value).await.map_err(map_err)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.conn()
            .lrange(key, start as isize, stop as isize)
            .await
            .map_err(map_err)
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        self.conn().llen(key).await.map_err(map_err)
    }
}
