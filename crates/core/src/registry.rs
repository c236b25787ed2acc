//! Room registry - the process-wide store of live rooms
//!
//! The registry owns every [`Room`] plus an index of which room each
//! connection currently occupies. It is an explicitly owned value, shared
//! through `Arc`, and lives exactly as long as the server that created it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{ConnId, Room, RoomSummary};

/// A room together with the lock that orders its ingestion
#[derive(Debug)]
pub(crate) struct RoomEntry {
    pub(crate) room: Room,
    /// Held by one in-flight ingestion at a time; tokio's mutex is FIFO
    pub(crate) ingest_turn: Arc<Mutex<()>>,
}

/// Everything guarded by the registry lock
#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    rooms: HashMap<String, RoomEntry>,
    /// Which room each connection is speaking or viewing in
    placements: HashMap<ConnId, String>,
}

impl RegistryState {
    pub(crate) fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id).map(|e| &e.room)
    }

    pub(crate) fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id).map(|e| &mut e.room)
    }

    pub(crate) fn ingest_turn(&self, room_id: &str) -> Option<Arc<Mutex<()>>> {
        self.rooms.get(room_id).map(|e| e.ingest_turn.clone())
    }

    /// The room, only if it is still the incarnation that owns `turn`.
    ///
    /// A room deleted and re-created under the same id gets a new turn lock,
    /// so work queued against the old one must not touch the new room.
    pub(crate) fn room_in_turn(&self, room_id: &str, turn: &Arc<Mutex<()>>) -> Option<&Room> {
        self.rooms
            .get(room_id)
            .filter(|e| Arc::ptr_eq(&e.ingest_turn, turn))
            .map(|e| &e.room)
    }

    pub(crate) fn room_in_turn_mut(
        &mut self,
        room_id: &str,
        turn: &Arc<Mutex<()>>,
    ) -> Option<&mut Room> {
        self.rooms
            .get_mut(room_id)
            .filter(|e| Arc::ptr_eq(&e.ingest_turn, turn))
            .map(|e| &mut e.room)
    }

    pub(crate) fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Insert a fresh room; the caller has already checked the id is free
    pub(crate) fn insert(&mut self, room: Room) -> &mut Room {
        let id = room.id.clone();
        if let Some(speaker) = room.speaker() {
            self.placements.insert(speaker, id.clone());
        }
        &mut self
            .rooms
            .entry(id)
            .or_insert(RoomEntry {
                room,
                ingest_turn: Arc::new(Mutex::new(())),
            })
            .room
    }

    pub(crate) fn remove(&mut self, room_id: &str) -> Option<Room> {
        let entry = self.rooms.remove(room_id)?;
        self.placements.retain(|_, placed| placed != room_id);
        Some(entry.room)
    }

    pub(crate) fn placement(&self, conn: ConnId) -> Option<&str> {
        self.placements.get(&conn).map(String::as_str)
    }

    pub(crate) fn place(&mut self, conn: ConnId, room_id: &str) {
        self.placements.insert(conn, room_id.to_string());
    }

    pub(crate) fn unplace(&mut self, conn: ConnId) -> Option<String> {
        self.placements.remove(&conn)
    }

    /// Directory rows ordered by room id
    pub(crate) fn summaries(&self) -> Vec<RoomSummary> {
        let mut rows: Vec<_> = self.rooms.values().map(|e| e.room.summary()).collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }
}

/// Shared handle to the room store
#[derive(Debug, Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().await
    }

    /// Check whether a room exists
    pub async fn contains(&self, room_id: &str) -> bool {
        self.state.read().await.contains(room_id)
    }

    /// Snapshot of one room
    pub async fn room(&self, room_id: &str) -> Option<Room> {
        self.state.read().await.room(room_id).cloned()
    }

    /// Room currently occupied by a connection
    pub async fn room_of(&self, conn: ConnId) -> Option<String> {
        self.state.read().await.placement(conn).map(str::to_string)
    }

    /// Get number of live rooms
    pub async fn len(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    /// Check if registry is empty
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_places_speaker() {
        let registry = RoomRegistry::new();
        let speaker = ConnId::new();
        {
            let mut state = registry.write().await;
            state.insert(Room::new("r1".into(), "pw", Some(speaker)).unwrap());
        }

        assert!(registry.contains("r1").await);
        assert_eq!(registry.room_of(speaker).await.as_deref(), Some("r1"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_clears_placements() {
        let registry = RoomRegistry::new();
        let viewer = ConnId::new();
        {
            let mut state = registry.write().await;
            state.insert(Room::new("r1".into(), "pw", None).unwrap());
            state.room_mut("r1").unwrap().add_viewer(viewer);
            state.place(viewer, "r1");

            assert!(state.remove("r1").is_some());
        }

        assert!(registry.is_empty().await);
        assert_eq!(registry.room_of(viewer).await, None);
    }

    #[tokio::test]
    async fn test_summaries_sorted_by_id() {
        let registry = RoomRegistry::new();
        {
            let mut state = registry.write().await;
            for id in ["b", "c", "a"] {
                state.insert(Room::new(id.into(), "pw", None).unwrap());
            }
        }

        let ids: Vec<_> = registry
            .read()
            .await
            .summaries()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
