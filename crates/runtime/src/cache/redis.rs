//! Redis-backed key/value store.
//!
//! Uses an async [`ConnectionManager`] (pooled, reconnecting) and native
//! `PSETEX` expiry. Bulk invalidation walks the keyspace with `SCAN MATCH`
//! rather than `KEYS` so it never blocks the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use super::store::{KeyValueStore, Result};

/// Keys deleted per `DEL` round trip during bulk invalidation.
const DELETE_CHUNK: usize = 500;

pub struct RedisKvStore {
    manager: ConnectionManager,
}

impl RedisKvStore {
    /// Connects to `url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!(target: "mob_ai::cache", url, "redis cache store connected");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KeyValueStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        conn.pset_ex::<_, _, ()>(key, value, millis).await?;
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut scan_conn = self.manager.clone();
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = scan_conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let mut conn = self.manager.clone();
        let mut deleted = 0u64;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let removed: u64 = conn.del(chunk).await?;
            deleted += removed;
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
