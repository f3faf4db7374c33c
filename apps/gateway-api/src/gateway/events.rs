//! Wire envelopes and inbound frame decoding.

use std::fmt;

use parley_common::clock::now_ms;
use parley_common::id::prefix;
use parley_common::PrefixedId;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::record::RoomId;

/// Identity string used for server-originated envelopes.
pub const SYSTEM_SENDER: &str = "system";

/// Reply sent to a connection whose frame could not be decoded.
pub const ERROR_PROCESSING_MESSAGE: &str = "Error processing message";

// ---------------------------------------------------------------------------
// Envelope kinds
// ---------------------------------------------------------------------------

/// The five message kinds. Clients send `Chat` (as `"message"`), `Typing`,
/// `JoinRoom` and `LeaveRoom`; the server only ever emits `Chat` and `System`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Chat,
    System,
    Typing,
    JoinRoom,
    LeaveRoom,
}

impl EnvelopeKind {
    /// Map an inbound `type` literal to a kind. Only client-originated kinds
    /// are recognised here.
    pub fn from_inbound(literal: &str) -> Option<Self> {
        match literal {
            "message" => Some(Self::Chat),
            "typing" => Some(Self::Typing),
            "join_room" => Some(Self::JoinRoom),
            "leave_room" => Some(Self::LeaveRoom),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Who an envelope is from: a user, or the server itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    User(String),
    System,
}

impl Sender {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User(id) => id,
            Self::System => SYSTEM_SENDER,
        }
    }
}

impl Serialize for Sender {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Sender {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(if s == SYSTEM_SENDER {
            Self::System
        } else {
            Self::User(s)
        })
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A reference to an uploaded object. Only the URL travels; bytes live in the
/// blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Outbound envelope
// ---------------------------------------------------------------------------

/// A delivered message. Immutable once built; `id` and `timestamp` are always
/// assigned here, never taken from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: EnvelopeKind,
    content: String,
    #[schema(value_type = String)]
    sender: Sender,
    timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attachments: Option<Vec<Attachment>>,
}

impl PrefixedId for Envelope {
    const PREFIX: &'static str = prefix::MESSAGE;
}

impl Envelope {
    fn build(
        kind: EnvelopeKind,
        content: String,
        sender: Sender,
        room_id: Option<RoomId>,
        attachments: Option<Vec<Attachment>>,
    ) -> Self {
        Self {
            id: Self::generate(),
            kind,
            content,
            sender,
            timestamp: now_ms(),
            room_id,
            attachments,
        }
    }

    /// A chat message from `user_id` to `room_id`.
    pub fn chat(
        room_id: impl Into<RoomId>,
        content: impl Into<String>,
        user_id: impl Into<String>,
        attachments: Option<Vec<Attachment>>,
    ) -> Self {
        let attachments = attachments.filter(|a| !a.is_empty());
        Self::build(
            EnvelopeKind::Chat,
            content.into(),
            Sender::User(user_id.into()),
            Some(room_id.into()),
            attachments,
        )
    }

    /// A server notice addressed to a single connection.
    pub fn system(content: impl Into<String>) -> Self {
        Self::build(EnvelopeKind::System, content.into(), Sender::System, None, None)
    }

    /// A server notice scoped to a room.
    pub fn room_notice(room_id: impl Into<RoomId>, content: impl Into<String>) -> Self {
        Self::build(
            EnvelopeKind::System,
            content.into(),
            Sender::System,
            Some(room_id.into()),
            None,
        )
    }

    /// Welcome notice carrying the connection id the gateway assigned.
    pub fn connected(connection_id: &str) -> Self {
        Self::system(format!("Connected with ID: {connection_id}"))
    }

    /// "‹user› is typing…" notice for a room.
    pub fn typing(room_id: impl Into<RoomId>, user_id: &str) -> Self {
        Self::room_notice(room_id, format!("{user_id} is typing…"))
    }

    /// Reply sent back when an inbound frame cannot be decoded.
    pub fn processing_error() -> Self {
        Self::system(ERROR_PROCESSING_MESSAGE)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn attachments(&self) -> Option<&[Attachment]> {
        self.attachments.as_deref()
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> String {
        // Every field is a plain string, integer or enum; this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a wire envelope, as a client would.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Inbound frames
// ---------------------------------------------------------------------------

/// Why an inbound frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not JSON, not an object, or no `type` field.
    Malformed(String),
    /// A `type` literal this gateway does not know.
    UnknownKind(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            Self::UnknownKind(kind) => write!(f, "unknown frame type {kind:?}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A frame that decoded but lacks a field its kind requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField {
        kind: EnvelopeKind,
        field: &'static str,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { kind, field } => write!(f, "{kind:?} frame missing {field}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Raw shape of a client frame. Unknown fields, including any client-supplied
/// `id` or `timestamp`, are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_attachments")]
    attachments: Option<Vec<Attachment>>,
}

/// Malformed attachment lists are dropped rather than failing the frame.
fn lenient_attachments<'de, D>(deserializer: D) -> Result<Option<Vec<Attachment>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// A decoded client frame whose kind is known but whose fields are not yet
/// checked against that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub kind: EnvelopeKind,
    pub content: Option<String>,
    pub room_id: Option<RoomId>,
    pub attachments: Option<Vec<Attachment>>,
}

/// A fully validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Chat {
        room_id: RoomId,
        content: String,
        attachments: Option<Vec<Attachment>>,
    },
    Typing {
        room_id: RoomId,
    },
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
}

/// Decode one inbound wire frame.
pub fn decode_frame(bytes: &[u8]) -> Result<ClientFrame, DecodeError> {
    let raw: RawFrame =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = EnvelopeKind::from_inbound(&raw.kind)
        .ok_or_else(|| DecodeError::UnknownKind(raw.kind.clone()))?;

    Ok(ClientFrame {
        kind,
        content: raw.content,
        room_id: raw.room_id,
        attachments: raw.attachments,
    })
}

impl ClientFrame {
    /// Check the fields required for this frame's kind.
    pub fn validate(self) -> Result<InboundFrame, ValidationError> {
        let kind = self.kind;
        let missing = |field| ValidationError::MissingField { kind, field };

        let room_id = self
            .room_id
            .filter(|r| !r.is_empty())
            .ok_or_else(|| missing("roomId"))?;

        match kind {
            EnvelopeKind::Chat => {
                let content = self
                    .content
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| missing("content"))?;
                Ok(InboundFrame::Chat {
                    room_id,
                    content,
                    attachments: self.attachments,
                })
            }
            EnvelopeKind::Typing => Ok(InboundFrame::Typing { room_id }),
            EnvelopeKind::JoinRoom => Ok(InboundFrame::JoinRoom { room_id }),
            EnvelopeKind::LeaveRoom => Ok(InboundFrame::LeaveRoom { room_id }),
            // Never produced by `decode_frame`.
            EnvelopeKind::System => Err(missing("type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_inbound_kind() {
        let cases = [
            (r#"{"type":"message","content":"hi","roomId":"general"}"#, EnvelopeKind::Chat),
            (r#"{"type":"typing","roomId":"general"}"#, EnvelopeKind::Typing),
            (r#"{"type":"join_room","roomId":"general"}"#, EnvelopeKind::JoinRoom),
            (r#"{"type":"leave_room","roomId":"general"}"#, EnvelopeKind::LeaveRoom),
        ];
        for (wire, kind) in cases {
            let frame = decode_frame(wire.as_bytes()).unwrap();
            assert_eq!(frame.kind, kind, "{wire}");
            assert_eq!(frame.room_id.as_deref(), Some("general"));
        }
    }

    #[test]
    fn unknown_kind_is_reported() {
        let err = decode_frame(br#"{"type":"dance","roomId":"general"}"#).unwrap_err();
        assert_eq!(err, DecodeError::UnknownKind("dance".to_string()));

        // Server-only kinds are not accepted from clients.
        let err = decode_frame(br#"{"type":"system","content":"x"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownKind(_)));
    }

    #[test]
    fn malformed_frames_are_reported() {
        assert!(matches!(decode_frame(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode_frame(br#"{"content":"hi"}"#), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode_frame(br#"[1,2]"#), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn chat_requires_room_and_content() {
        let frame = decode_frame(br#"{"type":"message","content":"hi"}"#).unwrap();
        assert_eq!(
            frame.validate(),
            Err(ValidationError::MissingField {
                kind: EnvelopeKind::Chat,
                field: "roomId"
            })
        );

        let frame = decode_frame(br#"{"type":"message","roomId":"general"}"#).unwrap();
        assert_eq!(
            frame.validate(),
            Err(ValidationError::MissingField {
                kind: EnvelopeKind::Chat,
                field: "content"
            })
        );

        let frame = decode_frame(br#"{"type":"message","content":"","roomId":"general"}"#).unwrap();
        assert!(frame.validate().is_err());
    }

    #[test]
    fn room_kinds_require_room_id() {
        for kind in ["typing", "join_room", "leave_room"] {
            let wire = format!(r#"{{"type":"{kind}"}}"#);
            let frame = decode_frame(wire.as_bytes()).unwrap();
            assert!(frame.validate().is_err(), "{kind}");
        }
    }

    #[test]
    fn chat_frame_keeps_attachments() {
        let wire = br#"{"type":"message","content":"look","roomId":"r",
            "attachments":[{"type":"image","url":"https://b/x.png","name":"x.png"}]}"#;
        let frame = decode_frame(wire).unwrap().validate().unwrap();
        match frame {
            InboundFrame::Chat { attachments, .. } => {
                let attachments = attachments.unwrap();
                assert_eq!(attachments[0].kind, AttachmentKind::Image);
                assert_eq!(attachments[0].name, "x.png");
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn bad_attachments_do_not_fail_the_frame() {
        let wire = br#"{"type":"message","content":"hi","roomId":"r","attachments":"nope"}"#;
        let frame = decode_frame(wire).unwrap();
        assert!(frame.attachments.is_none());
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn client_supplied_id_and_timestamp_are_ignored() {
        let wire = br#"{"type":"message","content":"hi","roomId":"r","id":"evil","timestamp":1}"#;
        let InboundFrame::Chat {
            room_id, content, ..
        } = decode_frame(wire).unwrap().validate().unwrap()
        else {
            panic!("expected chat");
        };

        let envelope = Envelope::chat(room_id, content, "alice", None);
        assert_ne!(envelope.id(), "evil");
        assert!(envelope.id().starts_with("msg_"));
        assert!(envelope.timestamp() > 1);
    }

    #[test]
    fn chat_envelope_wire_shape() {
        let envelope = Envelope::chat("general", "hi", "alice", Some(Vec::new()));
        let json: serde_json::Value = serde_json::from_str(&envelope.encode()).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["content"], "hi");
        assert_eq!(json["sender"], "alice");
        assert_eq!(json["roomId"], "general");
        assert!(json["timestamp"].is_i64());
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn system_envelopes_use_system_sender() {
        let welcome = Envelope::connected("conn_1");
        assert_eq!(welcome.kind(), EnvelopeKind::System);
        assert_eq!(welcome.sender(), &Sender::System);
        assert_eq!(welcome.content(), "Connected with ID: conn_1");

        let json: serde_json::Value = serde_json::from_str(&welcome.encode()).unwrap();
        assert_eq!(json["type"], "system");
        assert_eq!(json["sender"], "system");
        assert!(json.get("roomId").is_none());

        let typing = Envelope::typing("general", "alice");
        assert_eq!(typing.content(), "alice is typing…");
        assert_eq!(typing.room_id(), Some("general"));
    }

    #[test]
    fn envelope_ids_are_unique() {
        let a = Envelope::system("x");
        let b = Envelope::system("x");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn decode_reads_back_what_encode_wrote() {
        let attachments = vec![Attachment {
            kind: AttachmentKind::File,
            url: "https://b/report.pdf".to_string(),
            name: "report.pdf".to_string(),
        }];
        let envelope = Envelope::chat("general", "see attached", "bob", Some(attachments));
        let decoded = Envelope::decode(envelope.encode().as_bytes()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.attachments().map(<[_]>::len), Some(1));
    }
}
