//! Room model - one speaker, many viewers, an append-only transcript

use std::collections::HashSet;
use std::fmt;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Message;
use crate::error::{Error, Result};

/// Identifier of one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Directory entry for a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub has_speaker: bool,
    pub viewer_count: usize,
}

/// A live room.
///
/// Membership fields are private so the speaker/viewer exclusivity and the
/// append-only transcript can only be changed through the methods below.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    password_hash: String,
    speaker: Option<ConnId>,
    viewers: HashSet<ConnId>,
    messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Create a room, hashing the shared speaker password
    pub fn new(id: String, password: &str, speaker: Option<ConnId>) -> Result<Self> {
        Ok(Self::with_password_hash(id, Self::hash_password(password)?, speaker))
    }

    /// Create a room around an already computed hash
    pub(crate) fn with_password_hash(id: String, password_hash: String, speaker: Option<ConnId>) -> Self {
        Self {
            id,
            password_hash,
            speaker,
            viewers: HashSet::new(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Argon2 hash in PHC string form. CPU-bound.
    pub(crate) fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::PasswordHash(e.to_string()))?
            .to_string())
    }

    /// CPU-bound, like [`Room::hash_password`]
    pub(crate) fn verify_password_hash(password_hash: &str, candidate: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    }

    pub(crate) fn password_hash(&self) -> &str {
        &self.password_hash
    }

    pub fn verify_password(&self, candidate: &str) -> bool {
        Self::verify_password_hash(&self.password_hash, candidate)
    }

    pub fn speaker(&self) -> Option<ConnId> {
        self.speaker
    }

    pub fn is_speaker(&self, conn: ConnId) -> bool {
        self.speaker == Some(conn)
    }

    pub fn is_viewer(&self, conn: ConnId) -> bool {
        self.viewers.contains(&conn)
    }

    pub fn is_participant(&self, conn: ConnId) -> bool {
        self.is_speaker(conn) || self.is_viewer(conn)
    }

    pub fn viewers(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.viewers.iter().copied()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Speaker (if any) followed by every viewer
    pub fn participants(&self) -> Vec<ConnId> {
        self.speaker.into_iter().chain(self.viewers()).collect()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            has_speaker: self.speaker.is_some(),
            viewer_count: self.viewers.len(),
        }
    }

    /// Make `conn` the speaker, dropping it from the viewers
    pub(crate) fn install_speaker(&mut self, conn: ConnId) {
        self.viewers.remove(&conn);
        self.speaker = Some(conn);
    }

    pub(crate) fn clear_speaker(&mut self) {
        self.speaker = None;
    }

    /// Returns false if `conn` is the speaker or already watching
    pub(crate) fn add_viewer(&mut self, conn: ConnId) -> bool {
        if self.is_speaker(conn) {
            return false;
        }
        self.viewers.insert(conn)
    }

    pub(crate) fn remove_viewer(&mut self, conn: ConnId) -> bool {
        self.viewers.remove(&conn)
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.messages.push(message);
    }
}
