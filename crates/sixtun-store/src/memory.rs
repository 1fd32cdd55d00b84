//! In-memory store backend.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Store, StoreError, StoreResult};

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

/// In-process [`Store`] backed by a `HashMap` behind one `RwLock`.
///
/// Every mutating method holds the write lock for its full duration, so
/// the per-command atomicity the broker relies on holds here just as it
/// does against a real Redis.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let data = self.data.read().await;
        match data.get(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut data = self.data.write().await;
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Str("0".to_string()));
        match entry {
            Value::Str(s) => {
                let n: i64 = s
                    .parse()
                    .map_err(|_| StoreError::WrongType(key.to_string()))?;
                let n = n + 1;
                *s = n.to_string();
                Ok(n)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> StoreResult<()> {
        let mut data = self.data.write().await;
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        match entry {
            Value::Hash(h) => {
                for (f, v) in fields {
                    h.insert(f.to_string(), v.to_string());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let data = self.data.read().await;
        match data.get(key) {
            None => Ok(vec![None; fields.len()]),
            Some(Value::Hash(h)) => Ok(fields.iter().map(|f| h.get(*f).cloned()).collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        match entry {
            Value::List(l) => {
                l.push_back(value.to_string());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        match entry {
            Value::List(l) => {
                l.push_front(value.to_string());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            None => Ok(None),
            Some(Value::List(l)) => Ok(l.pop_front()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            None => Ok(None),
            Some(Value::List(l)) => Ok(l.pop_back()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn lrem(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            None => Ok(0),
            Some(Value::List(l)) => {
                let before = l.len();
                l.retain(|v| v != value);
                Ok(before - l.len())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let data = self.data.read().await;
        match data.get(key) {
            None => Ok(Vec::new()),
            Some(Value::List(l)) => {
                let len = l.len() as i64;
                let norm = |i: i64| -> i64 {
                    if i < 0 {
                        (len + i).max(0)
                    } else {
                        i
                    }
                };
                let start = norm(start);
                let stop = norm(stop).min(len - 1);
                if start > stop || start >= len {
                    return Ok(Vec::new());
                }
                Ok(l.iter()
                    .skip(start as usize)
                    .take((stop - start + 1) as usize)
                    .cloned()
                    .collect())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let data = self.data.read().await;
        match data.get(key) {
            None => Ok(0),
            Some(Value::List(l)) => Ok(l.len()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
