//! Core protocol types for Tavern's wire format.
//!
//! Every frame on the socket is a JSON object with a `"type"` field. A small
//! reserved set of types drives the authentication handshake
//! ([`ControlFrame`]); everything else is an application [`Envelope`] that the
//! hub routes by `roomId` without looking inside `data`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Message sent when the first frame after `auth_required` is not a valid
/// `auth` frame (or never arrives).
pub const INVALID_AUTH_MESSAGE: &str = "Invalid authentication message";

/// Message sent when the token validator rejects the presented token.
pub const INVALID_TOKEN: &str = "Invalid token";

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The name of a room (one tabletop table).
///
/// Newtype over `String`, serialized transparently so `RoomId("table-1")`
/// is just `"table-1"` on the wire. The empty string means "no room";
/// that's what a missing `roomId` field deserializes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Creates a room id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the "no room" id.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts an empty id into `None`.
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() { None } else { Some(self) }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Server-assigned identifier of one connection's session.
///
/// Opaque to clients. The server generates it when the handshake succeeds
/// and stamps it as `senderId` on every envelope the session emits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an already generated id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when no sender has been stamped yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated user behind a session, as reported by the token
/// validator. One user may hold several sessions (two browser tabs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a validator-provided user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ControlFrame — the authentication handshake
// ---------------------------------------------------------------------------

/// Frames used by the handshake that precedes registration.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON:
///   `{ "type": "auth", "token": "…", "room": "table-1" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Server → Client: "prove who you are." Sent exactly once, right after
    /// the upgrade.
    AuthRequired,

    /// Client → Server: credentials. `room` is optional; when absent the
    /// room from the upgrade URL (`/ws?room=…`) is used.
    Auth {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<RoomId>,
    },

    /// Server → Client: the session is registered.
    #[serde(rename_all = "camelCase")]
    AuthSuccess { user_id: UserId, client_id: ClientId },

    /// Server → Client: something went wrong. During the handshake this is
    /// always followed by the server closing the socket.
    Error { message: String },
}

impl ControlFrame {
    /// Shorthand for an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The `type` tag of an envelope.
///
/// A closed set of kinds the table knows about, plus [`MessageKind::Other`]
/// so a newer client can send kinds this server has never heard of; the hub
/// forwards them like any other room message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Chat,
    DiceRoll,
    Combat,
    JoinRoom,
    LeaveRoom,
    Broadcast,
    AuthRequired,
    Auth,
    AuthSuccess,
    Error,
    Other(String),
}

impl MessageKind {
    /// The wire spelling of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::DiceRoll => "dice_roll",
            Self::Combat => "combat",
            Self::JoinRoom => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::Broadcast => "broadcast",
            Self::AuthRequired => "auth_required",
            Self::Auth => "auth",
            Self::AuthSuccess => "auth_success",
            Self::Error => "error",
            Self::Other(kind) => kind,
        }
    }

    /// Returns `true` for the reserved handshake kinds, which never travel
    /// through a room.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired | Self::Auth | Self::AuthSuccess | Self::Error
        )
    }
}

impl From<String> for MessageKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "chat" => Self::Chat,
            "dice_roll" => Self::DiceRoll,
            "combat" => Self::Combat,
            "join_room" => Self::JoinRoom,
            "leave_room" => Self::LeaveRoom,
            "broadcast" => Self::Broadcast,
            "auth_required" => Self::AuthRequired,
            "auth" => Self::Auth,
            "auth_success" => Self::AuthSuccess,
            "error" => Self::Error,
            _ => Self::Other(kind),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(kind: &str) -> Self {
        Self::from(kind.to_owned())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(kind) => kind,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope — the room message wrapper
// ---------------------------------------------------------------------------

/// Every room message on the wire.
///
/// ```text
/// { "type": "dice_roll", "roomId": "table-1", "senderId": "9f…", "data": { … } }
/// ```
///
/// `roomId` and `senderId` default to empty and `data` to `null`, so a
/// client can send `{"type":"chat","data":{"text":"hi"}}` and let the server
/// fill in the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[serde(default)]
    pub room_id: RoomId,

    #[serde(default)]
    pub sender_id: ClientId,

    /// Opaque payload. Dice results, chat text, combat events: the hub
    /// never inspects it.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Creates an envelope with no room and no sender.
    pub fn new(kind: impl Into<MessageKind>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            room_id: RoomId::default(),
            sender_id: ClientId::default(),
            data,
        }
    }

    /// Sets the target room.
    pub fn in_room(mut self, room: impl Into<RoomId>) -> Self {
        self.room_id = room.into();
        self
    }

    /// Sets the sender.
    pub fn from_sender(mut self, sender: ClientId) -> Self {
        self.sender_id = sender;
        self
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire format is shared with browser clients, so these tests pin
    //! the exact JSON shapes.

    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&RoomId::new("table-1")).unwrap();
        assert_eq!(json, "\"table-1\"");
    }

    #[test]
    fn test_room_id_non_empty_filters_empty() {
        assert_eq!(RoomId::default().non_empty(), None);
        assert_eq!(
            RoomId::from("t").non_empty(),
            Some(RoomId::from("t"))
        );
    }

    #[test]
    fn test_control_frame_auth_required_json_format() {
        let json = serde_json::to_value(ControlFrame::AuthRequired).unwrap();
        assert_eq!(json, json!({"type": "auth_required"}));
    }

    #[test]
    fn test_control_frame_auth_success_uses_camel_case() {
        let frame = ControlFrame::AuthSuccess {
            user_id: UserId::new("u-1"),
            client_id: ClientId::new("c-1"),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            json!({"type": "auth_success", "userId": "u-1", "clientId": "c-1"})
        );
    }

    #[test]
    fn test_control_frame_auth_room_is_optional() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"type":"auth","token":"bad"}"#).unwrap();
        assert_eq!(
            frame,
            ControlFrame::Auth {
                token: "bad".into(),
                room: None
            }
        );
    }

    #[test]
    fn test_control_frame_auth_without_token_fails() {
        let result: Result<ControlFrame, _> =
            serde_json::from_str(r#"{"type":"auth","room":"table-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_control_frame_error_json_format() {
        let json =
            serde_json::to_value(ControlFrame::error(INVALID_TOKEN)).unwrap();
        assert_eq!(json, json!({"type": "error", "message": "Invalid token"}));
    }

    #[test]
    fn test_message_kind_known_and_unknown_spellings() {
        assert_eq!(MessageKind::from("dice_roll"), MessageKind::DiceRoll);
        assert_eq!(
            MessageKind::from("initiative"),
            MessageKind::Other("initiative".into())
        );
        assert_eq!(String::from(MessageKind::LeaveRoom), "leave_room");
        assert_eq!(MessageKind::Other("x".into()).to_string(), "x");
    }

    #[test]
    fn test_message_kind_is_protocol() {
        assert!(MessageKind::Auth.is_protocol());
        assert!(MessageKind::Error.is_protocol());
        assert!(!MessageKind::Chat.is_protocol());
        assert!(!MessageKind::Other("auth2".into()).is_protocol());
    }

    #[test]
    fn test_envelope_json_format() {
        let env = Envelope::new(MessageKind::Chat, json!({"text": "hi"}))
            .in_room("table-1")
            .from_sender(ClientId::new("abc"));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "chat",
                "roomId": "table-1",
                "senderId": "abc",
                "data": {"text": "hi"}
            })
        );
    }

    #[test]
    fn test_envelope_defaults_when_fields_missing() {
        let env: Envelope = serde_json::from_str(r#"{"type":"chat"}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Chat);
        assert!(env.room_id.is_empty());
        assert!(env.sender_id.is_empty());
        assert!(env.data.is_null());
    }

    #[test]
    fn test_envelope_preserves_unknown_kind() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"initiative","data":[3,1,2]}"#)
                .unwrap();
        assert_eq!(env.kind, MessageKind::Other("initiative".into()));
        let back = serde_json::to_value(&env).unwrap();
        assert_eq!(back["type"], "initiative");
    }

    #[test]
    fn test_envelope_without_type_fails() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"roomId":"table-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_control_frame_parses_as_envelope_kind() {
        // Clients sniff the kind through the envelope before deciding how
        // to interpret a frame.
        let env: Envelope = serde_json::from_str(
            r#"{"type":"auth_success","userId":"u","clientId":"c"}"#,
        )
        .unwrap();
        assert_eq!(env.kind, MessageKind::AuthSuccess);
    }
}
