//! Stateless room endpoints backed by the shared connection registry.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::events::{Attachment, Envelope};
use crate::gateway::fanout::DeliveryReport;
use crate::gateway::record::ConnectionRecord;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/messages", post(send_message))
        .route("/rooms/{room_id}/connections", get(list_connections))
}

// ---------------------------------------------------------------------------
// POST /api/v1/rooms/{room_id}/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
}

#[utoipa::path(
    post,
    path = "/api/v1/rooms/{room_id}/messages",
    tag = "Rooms",
    security(("bearer" = [])),
    params(
        ("room_id" = String, Path, description = "Room ID"),
    ),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Message broadcast to the room", body = DeliveryReport),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 503, description = "Registry unavailable", body = ApiErrorBody),
    ),
)]
pub async fn send_message(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<DeliveryReport>, ApiError> {
    let content = match body.content.as_deref() {
        Some(c) if !c.is_empty() => c,
        _ => {
            return Err(ApiError::validation(vec![FieldError {
                field: "content".to_string(),
                message: "Message content is required".to_string(),
            }]));
        }
    };

    let envelope = Envelope::chat(room_id.as_str(), content, user_id.as_str(), body.attachments);
    let report = state.broadcast.broadcast(&room_id, &envelope, None).await?;

    tracing::debug!(
        %user_id,
        room_id = %room_id,
        envelope_id = envelope.id(),
        delivered = report.delivered,
        "room message sent over http"
    );

    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}/connections
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/connections",
    tag = "Rooms",
    security(("bearer" = [])),
    params(
        ("room_id" = String, Path, description = "Room ID"),
    ),
    responses(
        (status = 200, description = "Live connections in the room", body = Vec<ConnectionRecord>),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 503, description = "Registry unavailable", body = ApiErrorBody),
    ),
)]
pub async fn list_connections(
    _auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<ConnectionRecord>>, ApiError> {
    let members = state.registry.list_by_room(&room_id).await?;
    Ok(Json(members))
}
