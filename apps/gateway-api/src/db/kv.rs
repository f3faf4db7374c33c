use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;

use crate::error::StoreError;

/// Abstraction over the shared key-value store holding connection records.
///
/// Backed by Redis when several gateway processes share one registry and by an
/// in-memory map for single-process deployments and tests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Deleting an absent key succeeds.
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    /// Every key starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 200;

/// Redis-backed store. `ConnectionManager` reconnects on its own and is cheap
/// to clone per command.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("redis connection established");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(|e| {
            tracing::error!(?e, key, "redis set failed");
            StoreError::from(e)
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(|e| {
            tracing::error!(?e, key, "redis get failed");
            StoreError::from(e)
        })
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            tracing::error!(?e, key, "redis del failed");
            StoreError::from(e)
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    tracing::error!(?e, prefix, "redis scan failed");
                    StoreError::from(e)
                })?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

/// Escape Redis glob metacharacters so a prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_set_get_del() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.set("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));

        store.del("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        // Deleting again is fine.
        store.del("a").await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_lists_by_prefix() {
        let store = MemoryStore::new();
        store.set("connections/a", "{}").await.unwrap();
        store.set("connections/b", "{}").await.unwrap();
        store.set("rooms/general", "{}").await.unwrap();

        let mut keys = store.keys_with_prefix("connections/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["connections/a", "connections/b"]);
    }

    #[test]
    fn escape_glob_escapes_metacharacters() {
        assert_eq!(escape_glob("connections/"), "connections/");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
