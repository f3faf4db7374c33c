pub mod health;
pub mod rooms;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", rooms::router())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Rooms
        rooms::send_message,
        rooms::list_connections,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Gateway types
            crate::gateway::record::ConnectionRecord,
            crate::gateway::events::Envelope,
            crate::gateway::events::EnvelopeKind,
            crate::gateway::events::Attachment,
            crate::gateway::events::AttachmentKind,
            crate::gateway::fanout::DeliveryReport,
            crate::gateway::fanout::FailedDelivery,
            // Route request/response types
            health::HealthResponse,
            rooms::SendMessageRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Rooms", description = "Room messaging over HTTP"),
    )
)]
pub struct ApiDoc;
