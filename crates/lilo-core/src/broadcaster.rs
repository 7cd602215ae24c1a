//! Join, ingest and leave paths: apply to room state, then fan out.
//!
//! Fan-out happens while the room lock is still held. Outbox sends never
//! block, and holding the lock means every member sees events in the same
//! order the room committed them.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LiloError, Result};
use crate::protocol::{Outbox, ServerEvent};
use crate::registry::{RoomHandle, RoomRegistry};
use crate::room::Room;
use crate::types::{Operation, OperationPayload, Point, RoomId, User, UserId};

/// Default upper bound on room id length, in characters.
pub const DEFAULT_MAX_ROOM_ID_LEN: usize = 64;

/// Where a connection currently sits. Returned by [`Broadcaster::join`] and
/// handed back on every later call from the same connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub display_name: String,
    pub color_tag: String,
}

/// Why a member is being removed from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Explicit leave or transport close.
    Left,
    /// Joined another room.
    Moved,
    /// Presence timeout.
    TimedOut,
}

pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
    max_room_id_len: usize,
}

impl Broadcaster {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            max_room_id_len: DEFAULT_MAX_ROOM_ID_LEN,
        }
    }

    pub fn with_max_room_id_len(mut self, max_room_id_len: usize) -> Self {
        self.max_room_id_len = max_room_id_len;
        self
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    fn validate_room_id(&self, room_id: &str) -> Result<()> {
        if room_id.trim().is_empty() {
            return Err(LiloError::InvalidRoomId("room id is empty".into()));
        }
        if room_id.chars().count() > self.max_room_id_len {
            return Err(LiloError::InvalidRoomId(format!(
                "room id longer than {} characters",
                self.max_room_id_len
            )));
        }
        Ok(())
    }

    /// Join `request.room_id`, leaving `current` first.
    ///
    /// The joining connection receives a `room-state` snapshot through
    /// `outbox`; everybody else in the room receives `user-joined`.
    pub async fn join(
        &self,
        current: Option<&Membership>,
        request: JoinRequest,
        outbox: Outbox,
    ) -> Result<Membership> {
        self.validate_room_id(&request.room_id)?;

        if let Some(previous) = current {
            self.depart(previous, Departure::Moved).await;
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: request.display_name,
            color: request.color_tag,
            cursor: None,
            last_seen: Utc::now(),
        };

        loop {
            let handle = self.registry.get_or_create(&request.room_id);
            let mut room = handle.lock().await;
            if room.is_reclaimed() {
                debug!(room_id = %request.room_id, "Raced with room reclamation, retrying join");
                continue;
            }

            room.insert_member(user.clone(), outbox.clone(), Instant::now());
            let snapshot = room.snapshot_for(&user.id);
            room.send_to(&user.id, Arc::new(snapshot));
            room.broadcast_except(&user.id, ServerEvent::UserJoined { user: user.clone() });

            info!(
                room_id = %request.room_id,
                user_id = %user.id,
                name = %user.name,
                members = room.member_count(),
                "User joined room"
            );
            return Ok(Membership {
                room_id: request.room_id,
                user_id: user.id,
            });
        }
    }

    fn member_room(&self, membership: &Membership) -> Result<RoomHandle> {
        self.registry
            .get(&membership.room_id)
            .ok_or_else(|| LiloError::UnknownRoom(membership.room_id.clone()))
    }

    fn ensure_member(room: &Room, membership: &Membership) -> Result<()> {
        if room.is_reclaimed() {
            return Err(LiloError::UnknownRoom(membership.room_id.clone()));
        }
        if !room.is_member(&membership.user_id) {
            return Err(LiloError::NotAMember {
                room_id: membership.room_id.clone(),
                user_id: membership.user_id.clone(),
            });
        }
        Ok(())
    }

    /// Stamp, apply and relay an operation from `membership`.
    ///
    /// The author gets no echo; it has already applied the change locally.
    pub async fn submit(
        &self,
        membership: &Membership,
        id: Option<String>,
        payload: OperationPayload,
    ) -> Result<Operation> {
        let handle = self.member_room(membership)?;
        let mut room = handle.lock().await;
        Self::ensure_member(&room, membership)?;

        let timestamp = Utc::now();
        room.touch(&membership.user_id, Instant::now(), timestamp);

        let operation = Operation {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            payload: stamp_owner(payload, &membership.user_id),
            user_id: membership.user_id.clone(),
            timestamp,
        };
        room.apply(operation.clone());

        let event = match &operation.payload {
            OperationPayload::CursorMove(cursor) => ServerEvent::CursorUpdate {
                user_id: membership.user_id.clone(),
                cursor: *cursor,
            },
            OperationPayload::Add(_)
            | OperationPayload::Update(_)
            | OperationPayload::Delete { .. }
            | OperationPayload::Clear => ServerEvent::Operation {
                operation: operation.clone(),
                word_pieces: room.canvas().pieces(),
                users: room.users(),
            },
        };
        let reached = room.broadcast_except(&membership.user_id, event);

        debug!(
            room_id = %membership.room_id,
            user_id = %membership.user_id,
            kind = operation.payload.kind(),
            log_len = room.log().len(),
            reached,
            "Operation applied"
        );
        Ok(operation)
    }

    /// Move or hide the member's cursor. Never logged.
    pub async fn move_cursor(&self, membership: &Membership, cursor: Option<Point>) -> Result<()> {
        self.submit(membership, None, OperationPayload::CursorMove(cursor))
            .await
            .map(|_| ())
    }

    /// Reset the member's presence clock.
    pub async fn heartbeat(&self, membership: &Membership) -> Result<()> {
        let handle = self.member_room(membership)?;
        let mut room = handle.lock().await;
        Self::ensure_member(&room, membership)?;
        room.touch(&membership.user_id, Instant::now(), Utc::now());
        Ok(())
    }

    /// Explicit leave or transport close.
    pub async fn leave(&self, membership: &Membership) -> bool {
        self.depart(membership, Departure::Left).await
    }

    async fn depart(&self, membership: &Membership, reason: Departure) -> bool {
        let Some(handle) = self.registry.get(&membership.room_id) else {
            return false;
        };
        let mut room = handle.lock().await;
        remove_member(&mut room, &membership.user_id, reason)
    }
}

/// The single leave path shared by explicit leaves, moves and evictions.
/// Must be called with the room lock held.
///
/// An evicted member's connection may still be open, so it gets the same
/// `user-left` naming itself and knows to join again.
pub(crate) fn remove_member(room: &mut Room, user_id: &str, reason: Departure) -> bool {
    let Some(member) = room.remove_member(user_id) else {
        return false;
    };
    let user = &member.user;
    let users = room.users();
    let remaining = users.len();
    let event = ServerEvent::UserLeft {
        user_id: user.id.clone(),
        users,
    };
    if reason == Departure::TimedOut {
        member.deliver(room.id(), Arc::new(event.clone()));
    }
    room.broadcast_except(user_id, event);
    info!(
        room_id = %room.id(),
        user_id = %user.id,
        name = %user.name,
        ?reason,
        remaining,
        "User left room"
    );
    true
}

fn stamp_owner(mut payload: OperationPayload, author: &str) -> OperationPayload {
    if let OperationPayload::Add(piece) | OperationPayload::Update(piece) = &mut payload {
        if piece.owner.is_empty() {
            piece.owner = author.to_string();
        }
    }
    payload
}
