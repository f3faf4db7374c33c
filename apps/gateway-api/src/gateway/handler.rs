//! Inbound frame dispatch for an open connection.

use crate::AppState;

use super::events::{decode_frame, Envelope, InboundFrame};
use super::record::ConnectionRecord;
use super::server::CLOSE_POLICY_VIOLATION;
use super::session::GatewaySession;

/// What the connection loop should do after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing to send back; keep reading.
    Continue,
    /// Send this envelope to the originating connection only, then keep reading.
    Reply(Envelope),
    /// Close the socket with this code and reason.
    Close { code: u16, reason: &'static str },
}

/// Process one inbound frame. Frames from a single connection are handled
/// strictly in arrival order by its task.
///
/// Undecodable frames get an error reply. Frames missing a field their kind
/// requires are dropped silently. Registry failures are logged and the
/// connection stays open.
pub async fn handle_frame(state: &AppState, session: &GatewaySession, bytes: &[u8]) -> FrameOutcome {
    let frame = match decode_frame(bytes) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(connection_id = %session.connection_id, %err, "undecodable frame");
            return FrameOutcome::Reply(Envelope::processing_error());
        }
    };

    let record = match state.registry.get(&session.connection_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::info!(
                connection_id = %session.connection_id,
                "frame from connection with no registry record"
            );
            return FrameOutcome::Close {
                code: CLOSE_POLICY_VIOLATION,
                reason: "Connection not found",
            };
        }
        Err(err) => {
            tracing::error!(connection_id = %session.connection_id, %err, "registry lookup failed");
            return FrameOutcome::Continue;
        }
    };

    let inbound = match frame.validate() {
        Ok(inbound) => inbound,
        Err(err) => {
            tracing::debug!(connection_id = %session.connection_id, %err, "dropping incomplete frame");
            return FrameOutcome::Continue;
        }
    };

    match inbound {
        InboundFrame::Chat {
            room_id,
            content,
            attachments,
        } => {
            let envelope = Envelope::chat(
                room_id.as_str(),
                content,
                session.user_id.as_str(),
                attachments,
            );
            broadcast(state, session, &room_id, &envelope, None).await;
        }
        InboundFrame::Typing { room_id } => {
            let envelope = Envelope::typing(room_id.as_str(), &session.user_id);
            broadcast(state, session, &room_id, &envelope, Some(&session.user_id)).await;
        }
        InboundFrame::JoinRoom { room_id } => {
            update_rooms(state, record, |r| r.join(&room_id), &room_id, "join").await;
        }
        InboundFrame::LeaveRoom { room_id } => {
            update_rooms(state, record, |r| r.leave(&room_id), &room_id, "leave").await;
        }
    }

    FrameOutcome::Continue
}

async fn broadcast(
    state: &AppState,
    session: &GatewaySession,
    room_id: &str,
    envelope: &Envelope,
    exclude_user_id: Option<&str>,
) {
    if let Err(err) = state
        .broadcast
        .broadcast(room_id, envelope, exclude_user_id)
        .await
    {
        tracing::error!(
            connection_id = %session.connection_id,
            room_id,
            %err,
            "broadcast failed"
        );
    }
}

/// Apply a membership change and rewrite the whole record.
async fn update_rooms(
    state: &AppState,
    mut record: ConnectionRecord,
    change: impl FnOnce(&mut ConnectionRecord) -> bool,
    room_id: &str,
    action: &'static str,
) {
    let changed = change(&mut record);
    match state.registry.put(&record).await {
        Ok(()) => tracing::debug!(
            connection_id = %record.connection_id,
            room_id,
            action,
            changed,
            rooms = record.joined_rooms.len(),
            "room membership updated"
        ),
        Err(err) => tracing::error!(
            connection_id = %record.connection_id,
            room_id,
            action,
            %err,
            "room membership update failed"
        ),
    }
}
