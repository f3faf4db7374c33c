//! Delivery capabilities: how an encoded envelope reaches one connection.
//!
//! The broadcast engine is written once against [`Deliverable`]. Sockets
//! accepted by this process are reached through the [`SessionTable`]; sockets
//! held elsewhere are reached through a connection push API. [`RoutedDelivery`]
//! picks between the two per connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc::error::TrySendError;

use super::session::SessionTable;

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The target connection no longer exists.
    Gone,
    /// The target's outbound queue is full.
    Backpressure,
    /// The push API refused the payload.
    Rejected(u16),
    /// The push API could not be reached.
    Unavailable(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gone => f.write_str("connection gone"),
            Self::Backpressure => f.write_str("outbound queue full"),
            Self::Rejected(status) => write!(f, "push rejected with status {status}"),
            Self::Unavailable(reason) => write!(f, "push api unavailable: {reason}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Something that can push a payload to a connection id.
#[async_trait]
pub trait Deliverable: Send + Sync {
    async fn deliver(&self, connection_id: &str, payload: Arc<str>) -> Result<(), DeliveryError>;
}

#[async_trait]
impl Deliverable for SessionTable {
    async fn deliver(&self, connection_id: &str, payload: Arc<str>) -> Result<(), DeliveryError> {
        let handle = self.lookup(connection_id).ok_or(DeliveryError::Gone)?;
        // Never wait on a recipient's queue: a slow socket must not hold up
        // the rest of the fan-out.
        handle.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::Gone,
        })
    }
}

// ---------------------------------------------------------------------------
// Remote push
// ---------------------------------------------------------------------------

/// Client for a connection-management API that can post to any connection id
/// regardless of which process accepted it (`POST {base}/@connections/{id}`).
#[derive(Clone)]
pub struct PushApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl PushApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn connection_url(&self, connection_id: &str) -> String {
        format!("{}/@connections/{}", self.base_url, connection_id)
    }
}

#[async_trait]
impl Deliverable for PushApiClient {
    async fn deliver(&self, connection_id: &str, payload: Arc<str>) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .post(self.connection_url(connection_id))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(?e, connection_id, "push request failed");
                DeliveryError::Unavailable(e.to_string())
            })?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::GONE | StatusCode::NOT_FOUND => Err(DeliveryError::Gone),
            s => Err(DeliveryError::Rejected(s.as_u16())),
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Delivers to sockets this process holds directly, and everything else
/// through the push API.
pub struct RoutedDelivery {
    local: Arc<SessionTable>,
    remote: PushApiClient,
}

impl RoutedDelivery {
    pub fn new(local: Arc<SessionTable>, remote: PushApiClient) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl Deliverable for RoutedDelivery {
    async fn deliver(&self, connection_id: &str, payload: Arc<str>) -> Result<(), DeliveryError> {
        if self.local.lookup(connection_id).is_some() {
            return self.local.deliver(connection_id, payload).await;
        }
        self.remote.deliver(connection_id, payload).await
    }
}
