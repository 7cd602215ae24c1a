//! Lilo room wire protocol.
//!
//! Every frame is a JSON object whose `type` field names the message.
//! Clients send [`ClientMessage`]s; the server answers with [`ServerEvent`]s.

use std::sync::Arc;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{Operation, Point, RoomId, User, UserId, WordPiece};

/// Client -> Server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join a room, leaving the current one first.
    JoinRoom {
        room_id: RoomId,
        user_name: String,
        user_color: String,
    },

    /// Leave the current room without closing the connection.
    LeaveRoom,

    /// Submit a content operation. `data` is decoded by
    /// [`OperationPayload::from_wire`](crate::types::OperationPayload::from_wire).
    Operation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        kind: String,
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Move (or hide, with `"cursor": null`) the sender's cursor.
    CursorMove(CursorTarget),

    /// Presence signal with no other effect.
    Heartbeat,
}

/// Where a `cursor-move` puts the cursor.
///
/// Decodes either `{"cursor": {x, y} | null}` or a bare `{x, y}`. A message
/// with neither is malformed; only an explicit `null` hides the cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorTarget(pub Option<Point>);

impl<'de> Deserialize<'de> for CursorTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut fields = serde_json::Map::deserialize(deserializer)?;
        if let Some(cursor) = fields.remove("cursor") {
            return serde_json::from_value(cursor)
                .map(Self)
                .map_err(de::Error::custom);
        }
        if fields.contains_key("x") || fields.contains_key("y") {
            return serde_json::from_value::<Point>(serde_json::Value::Object(fields))
                .map(|point| Self(Some(point)))
                .map_err(de::Error::custom);
        }
        Err(de::Error::missing_field("cursor"))
    }
}

impl Serialize for CursorTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CursorTarget", 1)?;
        state.serialize_field("cursor", &self.0)?;
        state.end()
    }
}

/// Server -> Client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Full snapshot, sent once to a connection that just joined.
    RoomState {
        room_id: RoomId,
        /// The id assigned to the joining connection.
        user_id: UserId,
        users: Vec<User>,
        word_pieces: Vec<WordPiece>,
        operations: Vec<Operation>,
    },

    UserJoined {
        user: User,
    },

    UserLeft {
        user_id: UserId,
        users: Vec<User>,
    },

    /// An applied operation plus the resulting room contents.
    Operation {
        operation: Operation,
        word_pieces: Vec<WordPiece>,
        users: Vec<User>,
    },

    CursorUpdate {
        user_id: UserId,
        cursor: Option<Point>,
    },

    /// A rejected message, sent to its sender only.
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoomState { .. } => "room-state",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::Operation { .. } => "operation",
            Self::CursorUpdate { .. } => "cursor-update",
            Self::Error { .. } => "error",
        }
    }
}

/// Outbound path of one connection. Events are shared between all the
/// members they are fanned out to.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerEvent>>;
