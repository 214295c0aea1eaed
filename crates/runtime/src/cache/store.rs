//! Key/value store contract behind the shared cache tiers.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache entry codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// TTL-capable byte store shared across processes.
///
/// Entries are idempotent re-derivations, so implementations need no
/// cross-instance locking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Fetches several keys at once; the default issues one `get` per key.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Deletes every key matching a glob `pattern` (`*` and `?`). Returns
    /// the number of keys removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;

    /// Removes entries whose TTL has passed. Stores that expire keys
    /// server-side keep the default.
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    async fn ping(&self) -> Result<()>;
}

/// Glob matcher with Redis `MATCH` semantics for `*` and `?`.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = k;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            k = resume;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn glob_matches_namespaces() {
        assert!(glob_match("l2:*", "l2:42:abcd"));
        assert!(glob_match("l3:mage:combat_dqn:*", "l3:mage:combat_dqn:ff00"));
        assert!(!glob_match("l3:mage:*", "l3:tank:combat_dqn:ff00"));
        assert!(glob_match("*", ""));
        assert!(glob_match("l?:1:*", "l2:1:x"));
        assert!(!glob_match("l2:1", "l2:10"));
    }
}
