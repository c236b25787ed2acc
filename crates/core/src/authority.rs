//! Session authority - who may speak in, watch, or create a room
//!
//! Argon2 work runs on the blocking pool with no registry lock held. The
//! decision itself is re-checked and applied under a single write lock, so
//! checking whether a room exists and creating it can never race with
//! another join.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::invariants::assert_room_invariants;
use crate::models::{ConnId, Message, Room};
use crate::presence::{Departure, SpeakerLeftPolicy};
use crate::registry::{RegistryState, RoomRegistry};

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room_id: String,
    pub is_speaker: bool,
    /// Room history at the moment of joining
    pub messages: Vec<Message>,
    /// Informational note for the client
    pub notice: Option<String>,
    /// The room did not exist before this call
    pub created: bool,
    /// Speaker or viewer sets changed; the directory is stale
    pub membership_changed: bool,
    /// Room the connection was moved out of to join this one
    pub previous: Option<Departure>,
}

impl JoinOutcome {
    fn new(room: &Room, is_speaker: bool) -> Self {
        Self {
            room_id: room.id.clone(),
            is_speaker,
            messages: room.messages().to_vec(),
            notice: None,
            created: false,
            membership_changed: false,
            previous: None,
        }
    }

    fn with_notice(mut self, notice: &str) -> Self {
        self.notice = Some(notice.to_string());
        self
    }
}

/// Enforces speaker/viewer admission rules
pub struct SessionAuthority {
    registry: Arc<RoomRegistry>,
    /// Server-wide secret gating brand-new rooms; `None` disables creation
    admin_secret: Option<String>,
    policy: SpeakerLeftPolicy,
}

impl SessionAuthority {
    pub fn new(
        registry: Arc<RoomRegistry>,
        admin_secret: Option<String>,
        policy: SpeakerLeftPolicy,
    ) -> Self {
        Self {
            registry,
            admin_secret: admin_secret.filter(|s| !s.is_empty()),
            policy,
        }
    }

    /// Whether new rooms can be created through a speaker join
    pub fn creation_enabled(&self) -> bool {
        self.admin_secret.is_some()
    }

    /// Pre-register a room with a password and no speaker
    #[instrument(skip(self, password))]
    pub async fn create_room(&self, room_id: &str, password: &str) -> Result<String> {
        require_room_id(room_id)?;
        if self.registry.contains(room_id).await {
            return Err(Error::RoomExists);
        }
        let password_hash = hash_off_thread(password).await?;

        let mut state = self.registry.write().await;
        if state.contains(room_id) {
            return Err(Error::RoomExists);
        }
        state.insert(Room::with_password_hash(room_id.to_string(), password_hash, None));
        info!(room_id = %room_id, "Room created without speaker");

        Ok(room_id.to_string())
    }

    /// Claim the speaker slot, creating the room when the admin secret allows it
    #[instrument(skip(self, password, admin_secret))]
    pub async fn join_as_speaker(
        &self,
        room_id: &str,
        password: &str,
        conn: ConnId,
        admin_secret: Option<&str>,
    ) -> Result<JoinOutcome> {
        require_room_id(room_id)?;

        // Retried when the room changes between the password check and the write lock
        loop {
            let stored = self
                .registry
                .read()
                .await
                .room(room_id)
                .map(|room| room.password_hash().to_string());

            let Some(stored) = stored else {
                self.check_admin_secret(room_id, admin_secret)?;
                let password_hash = hash_off_thread(password).await?;

                let mut state = self.registry.write().await;
                if state.contains(room_id) {
                    continue;
                }
                let previous = detach_elsewhere(&mut state, conn, room_id, self.policy);
                let room = state.insert(Room::with_password_hash(
                    room_id.to_string(),
                    password_hash,
                    Some(conn),
                ));
                info!(room_id = %room_id, conn_id = %conn, "Room created, speaker assigned");

                let mut outcome = JoinOutcome::new(room, true);
                outcome.created = true;
                outcome.membership_changed = true;
                outcome.previous = previous;
                return Ok(outcome);
            };

            if !verify_off_thread(&stored, password).await {
                warn!(room_id = %room_id, conn_id = %conn, "Speaker join with wrong password");
                return Err(Error::InvalidPassword);
            }

            let mut state = self.registry.write().await;
            let Some(room) = state
                .room(room_id)
                .filter(|room| room.password_hash() == stored)
            else {
                continue;
            };

            if let Some(incumbent) = room.speaker().filter(|s| *s != conn) {
                info!(room_id = %room_id, conn_id = %conn, incumbent = %incumbent, "Speaker slot taken");
                return Ok(JoinOutcome::new(room, false)
                    .with_notice("Another speaker is already active in this room."));
            }
            let already_speaker = room.is_speaker(conn);

            let previous = detach_elsewhere(&mut state, conn, room_id, self.policy);
            let Some(room) = state.room_mut(room_id) else {
                return Err(Error::RoomNotFound);
            };
            room.install_speaker(conn);
            assert_room_invariants(room);
            let mut outcome = JoinOutcome::new(room, true);
            state.place(conn, room_id);
            info!(room_id = %room_id, conn_id = %conn, "Speaker assigned");

            outcome.membership_changed = !already_speaker;
            outcome.previous = previous;
            return Ok(outcome);
        }
    }

    /// Watch a room
    #[instrument(skip(self))]
    pub async fn join_as_viewer(&self, room_id: &str, conn: ConnId) -> Result<JoinOutcome> {
        let mut state = self.registry.write().await;

        let Some(room) = state.room(room_id) else {
            return Err(Error::RoomNotFound);
        };
        if room.is_speaker(conn) {
            return Ok(JoinOutcome::new(room, true).with_notice("Already speaker in this room."));
        }

        let previous = detach_elsewhere(&mut state, conn, room_id, self.policy);
        let Some(room) = state.room_mut(room_id) else {
            return Err(Error::RoomNotFound);
        };
        let added = room.add_viewer(conn);
        assert_room_invariants(room);
        let mut outcome = JoinOutcome::new(room, false);
        state.place(conn, room_id);
        if added {
            info!(room_id = %room_id, conn_id = %conn, "Viewer joined");
        }

        outcome.membership_changed = added;
        outcome.previous = previous;
        Ok(outcome)
    }

    fn check_admin_secret(&self, room_id: &str, supplied: Option<&str>) -> Result<()> {
        let Some(expected) = self.admin_secret.as_deref() else {
            warn!(room_id = %room_id, "Room creation attempted while disabled");
            return Err(Error::CreationDisabled);
        };
        if supplied != Some(expected) {
            warn!(room_id = %room_id, "Room creation with invalid admin secret");
            return Err(Error::InvalidAdminSecret);
        }
        Ok(())
    }
}

async fn hash_off_thread(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || Room::hash_password(&password))
        .await
        .map_err(|e| Error::PasswordHash(e.to_string()))?
}

async fn verify_off_thread(password_hash: &str, candidate: &str) -> bool {
    let (password_hash, candidate) = (password_hash.to_string(), candidate.to_string());
    tokio::task::spawn_blocking(move || Room::verify_password_hash(&password_hash, &candidate))
        .await
        .unwrap_or(false)
}

fn require_room_id(room_id: &str) -> Result<()> {
    if room_id.trim().is_empty() {
        return Err(Error::EmptyInput("Room ID"));
    }
    Ok(())
}

/// Leave whatever other room `conn` currently occupies
fn detach_elsewhere(
    state: &mut RegistryState,
    conn: ConnId,
    target: &str,
    policy: SpeakerLeftPolicy,
) -> Option<Departure> {
    match state.placement(conn) {
        Some(current) if current != target => state.detach(conn, policy),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority(secret: Option<&str>) -> (Arc<RoomRegistry>, SessionAuthority) {
        let registry = Arc::new(RoomRegistry::new());
        let authority = SessionAuthority::new(
            registry.clone(),
            secret.map(str::to_string),
            SpeakerLeftPolicy::Vacate,
        );
        (registry, authority)
    }

    #[tokio::test]
    async fn test_creation_disabled_without_server_secret() {
        let (registry, authority) = authority(None);
        let err = authority
            .join_as_speaker("r1", "pw1", ConnId::new(), Some("S"))
            .await
            .unwrap_err();

        assert_eq!(err, Error::CreationDisabled);
        assert!(!registry.contains("r1").await);
    }

    #[tokio::test]
    async fn test_empty_server_secret_counts_as_unset() {
        let (_, authority) = authority(Some(""));
        assert!(!authority.creation_enabled());
        let err = authority
            .join_as_speaker("r1", "pw1", ConnId::new(), Some(""))
            .await
            .unwrap_err();
        assert_eq!(err, Error::CreationDisabled);
    }

    #[tokio::test]
    async fn test_wrong_admin_secret() {
        let (registry, authority) = authority(Some("S"));
        let err = authority
            .join_as_speaker("r1", "pw1", ConnId::new(), Some("nope"))
            .await
            .unwrap_err();

        assert_eq!(err, Error::InvalidAdminSecret);
        assert!(!registry.contains("r1").await);

        let err = authority
            .join_as_speaker("r1", "pw1", ConnId::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidAdminSecret);
    }

    #[tokio::test]
    async fn test_create_then_join_as_speaker() {
        let (registry, authority) = authority(Some("S"));
        let conn_a = ConnId::new();

        let outcome = authority
            .join_as_speaker("r1", "pw1", conn_a, Some("S"))
            .await
            .unwrap();

        assert!(outcome.created);
        assert!(outcome.is_speaker);
        assert!(outcome.membership_changed);
        let room = registry.room("r1").await.unwrap();
        assert_eq!(room.speaker(), Some(conn_a));
    }

    #[tokio::test]
    async fn test_existing_room_checks_password() {
        let (_, authority) = authority(Some("S"));
        authority.create_room("r1", "pw1").await.unwrap();

        let err = authority
            .join_as_speaker("r1", "wrong", ConnId::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidPassword);

        let outcome = authority
            .join_as_speaker("r1", "pw1", ConnId::new(), None)
            .await
            .unwrap();
        assert!(outcome.is_speaker);
        assert!(!outcome.created);
    }

    #[tokio::test]
    async fn test_active_speaker_not_evicted() {
        let (registry, authority) = authority(Some("S"));
        let (conn_a, conn_b) = (ConnId::new(), ConnId::new());
        authority
            .join_as_speaker("r1", "pw1", conn_a, Some("S"))
            .await
            .unwrap();

        let outcome = authority
            .join_as_speaker("r1", "pw1", conn_b, None)
            .await
            .unwrap();

        assert!(!outcome.is_speaker);
        assert!(!outcome.membership_changed);
        assert_eq!(
            outcome.notice.as_deref(),
            Some("Another speaker is already active in this room.")
        );
        assert_eq!(registry.room("r1").await.unwrap().speaker(), Some(conn_a));
        assert_eq!(registry.room_of(conn_b).await, None);
    }

    #[tokio::test]
    async fn test_viewer_promoted_to_speaker() {
        let (registry, authority) = authority(Some("S"));
        authority.create_room("r1", "pw1").await.unwrap();
        let conn = ConnId::new();

        authority.join_as_viewer("r1", conn).await.unwrap();
        let outcome = authority
            .join_as_speaker("r1", "pw1", conn, None)
            .await
            .unwrap();

        assert!(outcome.is_speaker);
        let room = registry.room("r1").await.unwrap();
        assert!(room.is_speaker(conn));
        assert!(!room.is_viewer(conn));
    }

    #[tokio::test]
    async fn test_speaker_rejoining_is_not_a_change() {
        let (_, authority) = authority(Some("S"));
        let conn = ConnId::new();
        authority
            .join_as_speaker("r1", "pw1", conn, Some("S"))
            .await
            .unwrap();

        let outcome = authority
            .join_as_speaker("r1", "pw1", conn, None)
            .await
            .unwrap();
        assert!(outcome.is_speaker);
        assert!(!outcome.membership_changed);
    }

    #[tokio::test]
    async fn test_join_as_viewer() {
        let (registry, authority) = authority(Some("S"));
        let (speaker, viewer) = (ConnId::new(), ConnId::new());

        let err = authority.join_as_viewer("r1", viewer).await.unwrap_err();
        assert_eq!(err, Error::RoomNotFound);

        authority
            .join_as_speaker("r1", "pw1", speaker, Some("S"))
            .await
            .unwrap();
        let outcome = authority.join_as_viewer("r1", viewer).await.unwrap();
        assert!(!outcome.is_speaker);
        assert!(outcome.membership_changed);

        let own = authority.join_as_viewer("r1", speaker).await.unwrap();
        assert!(own.is_speaker);
        assert_eq!(own.notice.as_deref(), Some("Already speaker in this room."));

        let room = registry.room("r1").await.unwrap();
        assert_eq!(room.viewer_count(), 1);
        assert!(!room.is_viewer(speaker));
    }

    #[tokio::test]
    async fn test_switching_rooms_leaves_previous() {
        let (registry, authority) = authority(Some("S"));
        let (speaker, viewer) = (ConnId::new(), ConnId::new());
        authority
            .join_as_speaker("r1", "pw1", speaker, Some("S"))
            .await
            .unwrap();
        authority.create_room("r2", "pw2").await.unwrap();
        authority.join_as_viewer("r1", viewer).await.unwrap();

        let outcome = authority
            .join_as_speaker("r2", "pw2", speaker, None)
            .await
            .unwrap();

        let previous = outcome.previous.unwrap();
        assert_eq!(previous.room_id, "r1");
        assert!(previous.was_speaker);
        assert_eq!(previous.remaining, vec![viewer]);
        assert_eq!(registry.room("r1").await.unwrap().speaker(), None);
        assert_eq!(registry.room_of(speaker).await.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_create_room_rejects_duplicates() {
        let (_, authority) = authority(None);
        assert_eq!(authority.create_room("r1", "pw").await.unwrap(), "r1");
        assert_eq!(
            authority.create_room("r1", "pw").await.unwrap_err(),
            Error::RoomExists
        );
        assert_eq!(
            authority.create_room("  ", "pw").await.unwrap_err(),
            Error::EmptyInput("Room ID")
        );
    }

    #[tokio::test]
    async fn test_hashing_does_not_hold_registry_lock() {
        let (registry, authority) = authority(Some("S"));

        let (outcome, seen) = tokio::join!(
            authority.join_as_speaker("r1", "pw1", ConnId::new(), Some("S")),
            registry.len(),
        );
        assert!(outcome.unwrap().created);
        assert_eq!(seen, 0);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_creators_share_one_room() {
        let (registry, authority) = authority(Some("S"));
        let (a, b) = (ConnId::new(), ConnId::new());

        let (first, second) = tokio::join!(
            authority.join_as_speaker("r1", "pw1", a, Some("S")),
            authority.join_as_speaker("r1", "pw1", b, Some("S")),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first.created ^ second.created);
        assert!(first.is_speaker ^ second.is_speaker);
        assert_eq!(registry.len().await, 1);
    }
}
