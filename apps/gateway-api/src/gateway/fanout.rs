//! Room fan-out: resolve a room's members from the registry and push an
//! envelope to each of them.
//!
//! Membership is recomputed from the registry on every call and never cached.
//! Delivery is best-effort: one failed recipient never stops delivery to the
//! others, and nothing is retried.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::StoreError;

use super::delivery::Deliverable;
use super::events::Envelope;
use super::registry::ConnectionRegistry;

/// One recipient that could not be reached.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FailedDelivery {
    pub connection_id: String,
    pub reason: String,
}

/// Outcome of a single broadcast. Informational only.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct DeliveryReport {
    /// Room members found in the registry.
    pub members: usize,
    /// Members skipped because they belong to the excluded user.
    pub excluded: usize,
    /// Successful deliveries.
    pub delivered: usize,
    pub failed: Vec<FailedDelivery>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Broadcasts envelopes to every live member of a room.
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    delivery: Arc<dyn Deliverable>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, delivery: Arc<dyn Deliverable>) -> Self {
        Self { registry, delivery }
    }

    /// Deliver `envelope` to every connection in `room_id`, skipping
    /// connections owned by `exclude_user_id`. Fails only if the membership
    /// lookup itself fails.
    pub async fn broadcast(
        &self,
        room_id: &str,
        envelope: &Envelope,
        exclude_user_id: Option<&str>,
    ) -> Result<DeliveryReport, StoreError> {
        let members = self.registry.list_by_room(room_id).await?;

        let mut report = DeliveryReport {
            members: members.len(),
            ..DeliveryReport::default()
        };

        let payload: Arc<str> = Arc::from(envelope.encode());
        let targets: Vec<String> = members
            .into_iter()
            .filter(|record| {
                let skip = exclude_user_id == Some(record.user_id.as_str());
                if skip {
                    report.excluded += 1;
                }
                !skip
            })
            .map(|record| record.connection_id)
            .collect();

        let attempts = targets.iter().map(|connection_id| {
            let payload = Arc::clone(&payload);
            async move {
                let result = self.delivery.deliver(connection_id, payload).await;
                (connection_id, result)
            }
        });

        for (connection_id, result) in join_all(attempts).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    tracing::warn!(%connection_id, room_id, %err, "delivery failed");
                    report.failed.push(FailedDelivery {
                        connection_id: connection_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            room_id,
            envelope_id = envelope.id(),
            members = report.members,
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast complete"
        );

        Ok(report)
    }
}
