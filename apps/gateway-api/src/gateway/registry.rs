//! Shared connection registry: connection id → [`ConnectionRecord`].
//!
//! The registry is the only source of truth for "who is connected and in which
//! rooms". It lives in a [`KeyValueStore`] so that several gateway processes
//! (and stateless request handlers) can consult it at once. Every write is a
//! full-record overwrite; there is no patching and no client-held lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time;

use crate::db::kv::KeyValueStore;
use crate::error::StoreError;

use super::record::ConnectionRecord;

/// Key prefix for connection records.
pub const CONNECTIONS_PREFIX: &str = "connections/";

/// Store-backed registry of live connections.
pub struct ConnectionRegistry {
    kv: Arc<dyn KeyValueStore>,
    op_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>, op_timeout: Duration) -> Self {
        Self { kv, op_timeout }
    }

    /// Create or fully overwrite the record for `record.connection_id`.
    pub async fn put(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        let key = record_key(&record.connection_id);
        let body = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.bounded(self.kv.set(&key, &body)).await
    }

    /// Fetch a record. `Ok(None)` when no record exists.
    pub async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        let key = record_key(connection_id);
        match self.bounded(self.kv.get(&key)).await? {
            Some(body) => decode_record(&key, &body).map(Some),
            None => Ok(None),
        }
    }

    /// Remove a record. Removing an absent record is not an error.
    pub async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        self.bounded(self.kv.del(&record_key(connection_id))).await
    }

    /// Every record whose joined rooms contain `room_id`. Fails only if the
    /// listing itself fails; records that cannot be fetched or decoded are
    /// skipped.
    ///
    /// This scans all live connections, so its cost grows with the total
    /// connection count rather than the room size. Records written or deleted
    /// by other processes while the scan runs may or may not be included.
    pub async fn list_by_room(&self, room_id: &str) -> Result<Vec<ConnectionRecord>, StoreError> {
        let keys = self
            .bounded(self.kv.keys_with_prefix(CONNECTIONS_PREFIX))
            .await?;

        let fetches = keys.iter().map(|key| async move {
            let body = self.bounded(self.kv.get(key)).await;
            (key, body)
        });

        let mut members = Vec::new();
        for (key, result) in join_all(fetches).await {
            match result {
                // Deleted between the listing and the fetch.
                Ok(None) => continue,
                Ok(Some(body)) => match decode_record(key, &body) {
                    Ok(record) if record.is_member(room_id) => members.push(record),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(%err, "skipping unreadable connection record"),
                },
                // One unreachable record must not cost the rest of the room.
                Err(err) => {
                    tracing::warn!(key = %key, %err, "skipping connection record fetch")
                }
            }
        }

        Ok(members)
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

fn record_key(connection_id: &str) -> String {
    format!("{CONNECTIONS_PREFIX}{connection_id}")
}

fn decode_record(key: &str, body: &str) -> Result<ConnectionRecord, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
