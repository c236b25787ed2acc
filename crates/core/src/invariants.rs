//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::models::Room;

/// Validate that a Room's membership is internally consistent
pub fn assert_room_invariants(room: &Room) {
    if let Some(speaker) = room.speaker() {
        debug_assert!(
            !room.is_viewer(speaker),
            "Room {} lists speaker {} as a viewer",
            room.id,
            speaker
        );
    }

    debug_assert!(
        !room.id.is_empty(),
        "Room with empty id in registry"
    );
}

/// Validate that the room history still starts with `before`, in order
pub fn assert_append_only(room: &Room, before: &[uuid::Uuid]) {
    debug_assert!(
        room.messages().len() >= before.len(),
        "Room {} lost messages",
        room.id
    );
    for (index, id) in before.iter().enumerate() {
        debug_assert!(
            room.messages().get(index).map(|m| m.id) == Some(*id),
            "Room {} message at position {} changed",
            room.id,
            index
        );
    }
}
