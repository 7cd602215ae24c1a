//! Process-wide table of live rooms.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::oplog::LogLimits;
use crate::room::Room;
use crate::types::RoomId;

/// Shared handle to one room. Holding the lock is the only way to read or
/// mutate the room, which serializes every path that touches it.
pub type RoomHandle = Arc<Mutex<Room>>;

/// Room id -> room. Rooms are independent: the map itself is sharded and
/// each room has its own lock, so there is no global lock.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomHandle>,
    limits: LogLimits,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(LogLimits::default())
    }
}

impl RoomRegistry {
    pub fn new(limits: LogLimits) -> Self {
        Self {
            rooms: DashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> LogLimits {
        self.limits
    }

    /// Return the room, creating an empty one if it does not exist.
    pub fn get_or_create(&self, room_id: &str) -> RoomHandle {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                debug!(room_id = %room_id, "Creating room");
                Arc::new(Mutex::new(Room::new(room_id, self.limits)))
            })
            .clone()
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    /// Remove a room. Deleting an absent room is a no-op that returns false.
    pub async fn delete(&self, room_id: &str) -> bool {
        let Some(handle) = self.get(room_id) else {
            return false;
        };
        let mut room = handle.lock().await;
        self.retire(room_id, &handle, &mut room)
    }

    /// Unlink `handle` from the table while its lock is held by the caller.
    ///
    /// The room is flagged first, so a joiner that fetched the same handle
    /// before the unlink sees the flag once it gets the lock and retries
    /// against a fresh room.
    pub(crate) fn retire(&self, room_id: &str, handle: &RoomHandle, room: &mut Room) -> bool {
        room.mark_reclaimed();
        self.rooms
            .remove_if(room_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// Snapshot of all handles. No map guard outlives this call.
    pub fn handles(&self) -> Vec<(RoomId, RoomHandle)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }
}
