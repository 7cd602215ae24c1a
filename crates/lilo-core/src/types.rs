//! Canvas entities, participants and operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LiloError, Result};
use crate::protocol::CursorTarget;

pub type RoomId = String;
pub type UserId = String;

/// A position on the shared canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A participant of a room, as seen by every other participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// Display name chosen by the client.
    pub name: String,
    /// Presentation-only color tag.
    pub color: String,
    pub cursor: Option<Point>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
}

/// A movable text or image fragment on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordPiece {
    pub id: String,
    pub text: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub owner: UserId,
    /// Embedded raster, usually a data URL produced by the OCR pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// What an operation does. Every site that applies or encodes an operation
/// matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum OperationPayload {
    Add(WordPiece),
    Update(WordPiece),
    Delete { id: String },
    Clear,
    CursorMove(Option<Point>),
}

#[derive(Deserialize)]
struct DeleteTarget {
    id: String,
}

impl OperationPayload {
    /// Decode a client-supplied `{kind, data}` pair.
    ///
    /// `cursor` is the older spelling of `cursor-move` whose data wraps the
    /// point in `{cursor}`.
    pub fn from_wire(kind: &str, data: serde_json::Value) -> Result<Self> {
        let malformed = |e: serde_json::Error| LiloError::MalformedOperation(format!("{kind}: {e}"));

        let payload = match kind {
            "add" => Self::Add(serde_json::from_value(data).map_err(malformed)?),
            "update" => Self::Update(serde_json::from_value(data).map_err(malformed)?),
            "delete" => {
                let target: DeleteTarget = serde_json::from_value(data).map_err(malformed)?;
                Self::Delete { id: target.id }
            }
            "clear" => Self::Clear,
            "cursor-move" => Self::CursorMove(serde_json::from_value(data).map_err(malformed)?),
            "cursor" => {
                let target: CursorTarget = serde_json::from_value(data).map_err(malformed)?;
                Self::CursorMove(target.0)
            }
            other => {
                return Err(LiloError::MalformedOperation(format!(
                    "unknown operation kind '{other}'"
                )));
            }
        };

        match &payload {
            Self::Add(piece) | Self::Update(piece) if piece.id.is_empty() => Err(
                LiloError::MalformedOperation(format!("{kind}: word piece id is empty")),
            ),
            Self::Delete { id } if id.is_empty() => Err(LiloError::MalformedOperation(
                "delete: word piece id is empty".into(),
            )),
            _ => Ok(payload),
        }
    }

    /// Ephemeral operations update presence only and are never logged.
    pub fn is_ephemeral(&self) -> bool {
        match self {
            Self::CursorMove(_) => true,
            Self::Add(_) | Self::Update(_) | Self::Delete { .. } | Self::Clear => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update(_) => "update",
            Self::Delete { .. } => "delete",
            Self::Clear => "clear",
            Self::CursorMove(_) => "cursor-move",
        }
    }
}

/// A stamped operation. The server timestamp defines the total order of a
/// room's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    #[serde(flatten)]
    pub payload: OperationPayload,
    pub user_id: UserId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn piece(id: &str) -> WordPiece {
        WordPiece {
            id: id.into(),
            text: "dawn".into(),
            x: 10.0,
            y: 10.0,
            rotation: 0.0,
            color: None,
            owner: String::new(),
            image_data: None,
            width: None,
            height: None,
        }
    }

    #[test]
    fn test_from_wire_add_with_defaults() {
        let payload = OperationPayload::from_wire(
            "add",
            json!({"id": "w1", "text": "dawn", "x": 10, "y": 10}),
        )
        .unwrap();
        assert_eq!(payload, OperationPayload::Add(piece("w1")));
        assert!(!payload.is_ephemeral());
    }

    #[test]
    fn test_from_wire_image_piece() {
        let payload = OperationPayload::from_wire(
            "update",
            json!({
                "id": "w2", "text": "moon", "x": 1.5, "y": 2.5, "rotation": -3.2,
                "owner": "u1", "imageData": "data:image/png;base64,AAAA",
                "width": 120, "height": 40
            }),
        )
        .unwrap();
        let OperationPayload::Update(p) = payload else {
            panic!("expected update");
        };
        assert_eq!(p.owner, "u1");
        assert_eq!(p.image_data.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(p.width, Some(120.0));
    }

    #[test]
    fn test_from_wire_delete_and_clear() {
        assert_eq!(
            OperationPayload::from_wire("delete", json!({"id": "w1"})).unwrap(),
            OperationPayload::Delete { id: "w1".into() }
        );
        // The data of a clear is ignored, whatever the client sends.
        assert_eq!(
            OperationPayload::from_wire("clear", json!({})).unwrap(),
            OperationPayload::Clear
        );
    }

    #[test]
    fn test_from_wire_cursor_spellings() {
        let modern = OperationPayload::from_wire("cursor-move", json!({"x": 4, "y": 5})).unwrap();
        let legacy =
            OperationPayload::from_wire("cursor", json!({"cursor": {"x": 4, "y": 5}})).unwrap();
        assert_eq!(modern, legacy);
        assert!(modern.is_ephemeral());

        let hidden = OperationPayload::from_wire("cursor-move", json!(null)).unwrap();
        assert_eq!(hidden, OperationPayload::CursorMove(None));
        let hidden = OperationPayload::from_wire("cursor", json!({"cursor": null})).unwrap();
        assert_eq!(hidden, OperationPayload::CursorMove(None));
    }

    #[test]
    fn test_from_wire_legacy_cursor_requires_position() {
        let empty = OperationPayload::from_wire("cursor", json!({}));
        assert!(matches!(empty, Err(LiloError::MalformedOperation(_))));
    }

    #[test]
    fn test_from_wire_rejects_malformed() {
        let unknown = OperationPayload::from_wire("rotate", json!({}));
        assert!(matches!(unknown, Err(LiloError::MalformedOperation(_))));

        let missing_text = OperationPayload::from_wire("add", json!({"id": "w1", "x": 0, "y": 0}));
        assert!(matches!(missing_text, Err(LiloError::MalformedOperation(_))));

        let missing_id = OperationPayload::from_wire("delete", json!({}));
        assert!(matches!(missing_id, Err(LiloError::MalformedOperation(_))));

        let empty_id = OperationPayload::from_wire("delete", json!({"id": ""}));
        assert!(matches!(empty_id, Err(LiloError::MalformedOperation(_))));
    }

    #[test]
    fn test_operation_wire_shape() {
        let op = Operation {
            id: "op-1".into(),
            payload: OperationPayload::Delete { id: "w1".into() },
            user_id: "u1".into(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "op-1",
                "kind": "delete",
                "data": {"id": "w1"},
                "userId": "u1",
                "timestamp": 1_700_000_000_123_i64,
            })
        );

        let back: Operation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_clear_operation_has_no_data() {
        let op = Operation {
            id: "op-2".into(),
            payload: OperationPayload::Clear,
            user_id: "u1".into(),
            timestamp: DateTime::from_timestamp_millis(0).unwrap(),
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["kind"], "clear");
        assert!(value.get("data").is_none());
    }
}
