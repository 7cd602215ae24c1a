//! Authoritative state of one room.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::debug;

use crate::canvas::Canvas;
use crate::oplog::{LogLimits, OperationLog};
use crate::protocol::{Outbox, ServerEvent};
use crate::types::{Operation, OperationPayload, Point, RoomId, User, UserId};

/// A connected participant and the path used to reach it.
#[derive(Debug)]
pub struct Member {
    pub user: User,
    last_active: Instant,
    outbox: Outbox,
}

/// Users, word pieces and operation log of a room.
///
/// A `Room` is only ever touched through the mutex held by the registry, so
/// every method here runs with exclusive access.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: IndexMap<UserId, Member>,
    canvas: Canvas,
    log: OperationLog,
    reclaimed: bool,
}

impl Room {
    pub fn new(id: impl Into<RoomId>, limits: LogLimits) -> Self {
        Self {
            id: id.into(),
            members: IndexMap::new(),
            canvas: Canvas::new(),
            log: OperationLog::new(limits),
            reclaimed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.members.get(user_id).map(|m| &m.user)
    }

    /// Users in join order.
    pub fn users(&self) -> Vec<User> {
        self.members.values().map(|m| m.user.clone()).collect()
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub(crate) fn log_mut(&mut self) -> &mut OperationLog {
        &mut self.log
    }

    /// Set once the room has been unlinked from the registry. A reclaimed
    /// room accepts no new members.
    pub fn is_reclaimed(&self) -> bool {
        self.reclaimed
    }

    pub(crate) fn mark_reclaimed(&mut self) {
        self.reclaimed = true;
    }

    pub fn insert_member(&mut self, user: User, outbox: Outbox, now: Instant) {
        self.members.insert(
            user.id.clone(),
            Member {
                user,
                last_active: now,
                outbox,
            },
        );
    }

    /// Drop a member. The returned `Member` still holds its outbox until it
    /// is dropped.
    pub fn remove_member(&mut self, user_id: &str) -> Option<Member> {
        self.members.shift_remove(user_id)
    }

    /// Record activity from a member. Returns false for non-members.
    pub fn touch(&mut self, user_id: &str, now: Instant, wall: DateTime<Utc>) -> bool {
        match self.members.get_mut(user_id) {
            Some(member) => {
                member.last_active = now;
                member.user.last_seen = wall;
                true
            }
            None => false,
        }
    }

    fn set_cursor(&mut self, user_id: &str, cursor: Option<Point>) {
        if let Some(member) = self.members.get_mut(user_id) {
            member.user.cursor = cursor;
        }
    }

    /// Apply a stamped operation authored by one of the members.
    ///
    /// Durable operations go to the canvas and the log; a cursor move only
    /// updates its author's cursor.
    pub fn apply(&mut self, operation: Operation) {
        self.canvas.apply(&operation.payload);
        if let OperationPayload::CursorMove(cursor) = &operation.payload {
            let cursor = *cursor;
            self.set_cursor(&operation.user_id, cursor);
        }
        if !operation.payload.is_ephemeral() {
            self.log.append(operation);
        }
    }

    /// Members that have been silent for longer than `timeout` at `now`.
    pub fn idle_members(&self, now: Instant, timeout: Duration) -> Vec<UserId> {
        self.members
            .values()
            .filter(|m| now.saturating_duration_since(m.last_active) > timeout)
            .map(|m| m.user.id.clone())
            .collect()
    }

    /// The join snapshot for `user_id`.
    pub fn snapshot_for(&self, user_id: &str) -> ServerEvent {
        ServerEvent::RoomState {
            room_id: self.id.clone(),
            user_id: user_id.to_string(),
            users: self.users(),
            word_pieces: self.canvas.pieces(),
            operations: self.log.to_vec(),
        }
    }

    /// Deliver an event to a single member.
    pub fn send_to(&self, user_id: &str, event: Arc<ServerEvent>) -> bool {
        let Some(member) = self.members.get(user_id) else {
            return false;
        };
        member.deliver(&self.id, event)
    }

    /// Fan an event out to every member except `except`. Returns how many
    /// members it reached.
    pub fn broadcast_except(&self, except: &str, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        self.members
            .values()
            .filter(|m| m.user.id != except)
            .filter(|m| m.deliver(&self.id, event.clone()))
            .count()
    }
}

impl Member {
    pub(crate) fn deliver(&self, room_id: &str, event: Arc<ServerEvent>) -> bool {
        let name = event.name();
        if self.outbox.send(event).is_err() {
            debug!(room_id = %room_id, user_id = %self.user.id, event = name, "Delivery failed, connection gone");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WordPiece;
    use tokio::sync::mpsc;

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            name: id.to_uppercase(),
            color: "#45B7D1".into(),
            cursor: None,
            last_seen: Utc::now(),
        }
    }

    fn add(id: &str, author: &str) -> Operation {
        Operation {
            id: format!("op-{id}"),
            payload: OperationPayload::Add(WordPiece {
                id: id.into(),
                text: "dawn".into(),
                x: 0.0,
                y: 0.0,
                rotation: 0.0,
                color: None,
                owner: author.into(),
                image_data: None,
                width: None,
                height: None,
            }),
            user_id: author.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_cursor_move_is_not_logged() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut room = Room::new("ABCDE", LogLimits::default());
        room.insert_member(user("a"), tx, Instant::now());

        room.apply(Operation {
            id: "op-c".into(),
            payload: OperationPayload::CursorMove(Some(Point { x: 1.0, y: 2.0 })),
            user_id: "a".into(),
            timestamp: Utc::now(),
        });
        room.apply(add("w1", "a"));

        assert_eq!(room.log().len(), 1);
        assert_eq!(room.user("a").unwrap().cursor, Some(Point { x: 1.0, y: 2.0 }));
        assert_eq!(room.canvas().len(), 1);
    }

    #[test]
    fn test_broadcast_skips_author_and_dead_peers() {
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, rx_c) = mpsc::unbounded_channel();
        let mut room = Room::new("ABCDE", LogLimits::default());
        let now = Instant::now();
        room.insert_member(user("a"), tx_a, now);
        room.insert_member(user("b"), tx_b, now);
        room.insert_member(user("c"), tx_c, now);
        drop(rx_c);

        let reached = room.broadcast_except(
            "a",
            ServerEvent::CursorUpdate {
                user_id: "a".into(),
                cursor: None,
            },
        );

        assert_eq!(reached, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().name(), "cursor-update");
    }

    #[test]
    fn test_idle_members() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut room = Room::new("ABCDE", LogLimits::default());
        let start = Instant::now();
        room.insert_member(user("a"), tx.clone(), start);
        room.insert_member(user("b"), tx, start);

        let later = start + Duration::from_secs(20);
        assert!(room.touch("b", later, Utc::now()));
        assert!(!room.touch("ghost", later, Utc::now()));

        let idle = room.idle_members(start + Duration::from_secs(31), Duration::from_secs(15));
        assert_eq!(idle, vec!["a".to_string()]);
    }

    #[test]
    fn test_users_keep_join_order_after_removal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut room = Room::new("ABCDE", LogLimits::default());
        let now = Instant::now();
        for id in ["a", "b", "c"] {
            room.insert_member(user(id), tx.clone(), now);
        }
        assert_eq!(room.remove_member("b").map(|m| m.user.id), Some("b".to_string()));
        assert!(room.remove_member("b").is_none());
        let ids: Vec<_> = room.users().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, ["a", "c"]);
    }
}
