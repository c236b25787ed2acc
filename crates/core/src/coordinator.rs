//! Coordinator - the components wired around one shared registry

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::authority::SessionAuthority;
use crate::directory::RoomDirectory;
use crate::error::{Error, Result};
use crate::models::{ConnId, LangCode};
use crate::pipeline::TranscriptionPipeline;
use crate::presence::{PresenceTracker, SpeakerLeftPolicy};
use crate::registry::RoomRegistry;
use crate::translation::TranslationGateway;

/// Policy knobs consumed by the coordinator
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Secret required to create brand-new rooms; `None` or empty disables creation
    pub admin_secret: Option<String>,
    pub speaker_left_policy: SpeakerLeftPolicy,
}

pub struct Coordinator {
    registry: Arc<RoomRegistry>,
    authority: SessionAuthority,
    pipeline: TranscriptionPipeline,
    presence: PresenceTracker,
    directory: RoomDirectory,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, gateway: TranslationGateway) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let gateway = Arc::new(gateway);

        Self {
            authority: SessionAuthority::new(
                registry.clone(),
                config.admin_secret,
                config.speaker_left_policy,
            ),
            pipeline: TranscriptionPipeline::new(registry.clone(), gateway),
            presence: PresenceTracker::new(registry.clone(), config.speaker_left_policy),
            directory: RoomDirectory::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn authority(&self) -> &SessionAuthority {
        &self.authority
    }

    pub fn pipeline(&self) -> &TranscriptionPipeline {
        &self.pipeline
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    pub fn gateway(&self) -> &TranslationGateway {
        self.pipeline.gateway()
    }

    /// Serve a stored translation to a participant of the room
    pub async fn request_translation(
        &self,
        room_id: &str,
        conn: ConnId,
        message_id: Uuid,
        target: &LangCode,
    ) -> Result<String> {
        if !self.gateway().supports(target) {
            return Err(Error::UnsupportedLanguage(target.to_string()));
        }

        let state = self.registry.read().await;
        let room = state.room(room_id).ok_or(Error::RoomNotFound)?;
        if !room.is_participant(conn) {
            warn!(room_id = %room_id, conn_id = %conn, "Translation request from outside the room");
            return Err(Error::not_member());
        }

        TranslationGateway::lookup_cached(room, message_id, target)
    }
}
