//! Presence tracking
//!
//! Connection loss is an expected lifecycle event. It vacates whichever
//! slot the connection held and reports what the remaining participants
//! need to be told.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::ConnId;
use crate::registry::{RegistryState, RoomRegistry};

/// What happens to a room whose speaker goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerLeftPolicy {
    /// Keep the room, its viewers and its history; await a new speaker
    #[default]
    Vacate,
    /// Close the room and detach its viewers
    Delete,
}

/// Effect of a connection leaving its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: String,
    pub was_speaker: bool,
    /// The room no longer exists
    pub room_closed: bool,
    pub viewer_count: usize,
    /// Connections that were in the room with the departed one
    pub remaining: Vec<ConnId>,
}

impl Departure {
    /// Text for the `speaker_left` notice, if one is due
    pub fn speaker_left_notice(&self) -> Option<&'static str> {
        match (self.was_speaker, self.room_closed) {
            (false, _) => None,
            (true, false) => Some("The speaker has left. The room is awaiting a new speaker."),
            (true, true) => Some("The speaker has left and the room has been closed."),
        }
    }
}

impl RegistryState {
    /// Remove `conn` from the room it occupies
    pub(crate) fn detach(&mut self, conn: ConnId, policy: SpeakerLeftPolicy) -> Option<Departure> {
        let room_id = self.unplace(conn)?;
        let room = self.room_mut(&room_id)?;

        if room.is_speaker(conn) {
            let remaining: Vec<_> = room.viewers().collect();
            let room_closed = policy == SpeakerLeftPolicy::Delete;
            if room_closed {
                self.remove(&room_id);
                info!(room_id = %room_id, conn_id = %conn, "Speaker left, room closed");
            } else {
                room.clear_speaker();
                info!(room_id = %room_id, conn_id = %conn, "Speaker left, room awaiting speaker");
            }

            return Some(Departure {
                room_id,
                was_speaker: true,
                room_closed,
                viewer_count: if room_closed { 0 } else { remaining.len() },
                remaining,
            });
        }

        if !room.remove_viewer(conn) {
            return None;
        }
        info!(room_id = %room_id, conn_id = %conn, count = room.viewer_count(), "Viewer left");

        Some(Departure {
            room_id,
            was_speaker: false,
            room_closed: false,
            viewer_count: room.viewer_count(),
            remaining: room.participants(),
        })
    }
}

/// Reacts to lost connections
pub struct PresenceTracker {
    registry: Arc<RoomRegistry>,
    policy: SpeakerLeftPolicy,
}

impl PresenceTracker {
    pub fn new(registry: Arc<RoomRegistry>, policy: SpeakerLeftPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> SpeakerLeftPolicy {
        self.policy
    }

    /// Handle a closed connection; `None` if it was in no room
    pub async fn on_disconnect(&self, conn: ConnId) -> Option<Departure> {
        let mut state = self.registry.write().await;
        let departure = state.detach(conn, self.policy);
        if let Some(d) = &departure {
            if let Some(room) = state.room(&d.room_id) {
                crate::invariants::assert_room_invariants(room);
            }
        }
        departure
    }
}
