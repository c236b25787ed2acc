//! Transcription pipeline
//!
//! Turns a speaker's utterance into a stored, translated [`Message`].
//! Ingestion is serialized per room: the room's turn lock is held from the
//! authorization check until the caller has finished broadcasting, so
//! messages leave in the order they were submitted no matter how long each
//! fan-out takes. Unrelated rooms never wait on each other.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::invariants::assert_append_only;
use crate::models::{ConnId, Message};
use crate::registry::RoomRegistry;
use crate::translation::TranslationGateway;

/// A message that has been appended and is ready to broadcast.
///
/// Holding this value keeps the room's ingestion turn; drop it once the
/// message has been handed to every recipient.
#[derive(Debug)]
pub struct Ingested {
    pub room_id: String,
    pub message: Message,
    /// Speaker and viewers at the moment of appending
    pub recipients: Vec<ConnId>,
    _turn: OwnedMutexGuard<()>,
}

pub struct TranscriptionPipeline {
    registry: Arc<RoomRegistry>,
    gateway: Arc<TranslationGateway>,
}

impl TranscriptionPipeline {
    pub fn new(registry: Arc<RoomRegistry>, gateway: Arc<TranslationGateway>) -> Self {
        Self { registry, gateway }
    }

    pub fn gateway(&self) -> &TranslationGateway {
        &self.gateway
    }

    /// Authorize, translate, append.
    ///
    /// Authorization is decided once, before the fan-out: a speaker who
    /// disconnects mid-translation still gets this message delivered.
    pub async fn ingest(
        &self,
        room_id: &str,
        speaker: ConnId,
        text: &str,
        source_lang: &str,
    ) -> Result<Ingested> {
        let turn_lock = self
            .registry
            .read()
            .await
            .ingest_turn(room_id)
            .ok_or(Error::RoomNotFound)?;
        let turn = turn_lock.clone().lock_owned().await;

        {
            let state = self.registry.read().await;
            let Some(room) = state.room_in_turn(room_id, &turn_lock) else {
                warn!(room_id = %room_id, "Room closed while waiting for ingestion turn");
                return Err(Error::RoomNotFound);
            };
            if !room.is_speaker(speaker) {
                warn!(room_id = %room_id, conn_id = %speaker, "Transcript from non-speaker rejected");
                return Err(Error::not_speaker());
            }
        }
        if text.trim().is_empty() {
            return Err(Error::EmptyInput("Transcript"));
        }

        let translations = self.gateway.fan_out_all(text, source_lang).await;
        let message =
            Message::new(text.to_string(), source_lang.to_string()).with_translations(translations);

        let mut state = self.registry.write().await;
        let Some(room) = state.room_in_turn_mut(room_id, &turn_lock) else {
            warn!(room_id = %room_id, "Room closed during translation, message dropped");
            return Err(Error::RoomNotFound);
        };
        let before: Vec<_> = room.messages().iter().map(|m| m.id).collect();
        room.append(message.clone());
        assert_append_only(room, &before);
        info!(room_id = %room_id, message_id = %message.id, count = room.messages().len(), "Transcript stored");

        Ok(Ingested {
            room_id: room_id.to_string(),
            message,
            recipients: room.participants(),
            _turn: turn,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{LangCode, Room, Translation};
    use crate::translation::testing::{targets, FakeTranslator};
    use crate::translation::TranslateError;

    async fn setup(fake: FakeTranslator) -> (Arc<RoomRegistry>, TranscriptionPipeline, ConnId) {
        let registry = Arc::new(RoomRegistry::new());
        let speaker = ConnId::new();
        registry
            .write()
            .await
            .insert(Room::new("r1".into(), "pw1", Some(speaker)).unwrap());
        let gateway = Arc::new(TranslationGateway::new(Arc::new(fake), targets()));
        let pipeline = TranscriptionPipeline::new(registry.clone(), gateway);
        (registry, pipeline, speaker)
    }

    #[tokio::test]
    async fn test_ingest_translates_and_appends() {
        let (registry, pipeline, speaker) = setup(FakeTranslator::default()).await;
        let viewer = ConnId::new();
        registry.write().await.room_mut("r1").unwrap().add_viewer(viewer);

        let ingested = pipeline.ingest("r1", speaker, "hello", "en-US").await.unwrap();
        let message = &ingested.message;

        assert_eq!(message.text, "hello");
        assert_eq!(message.source_lang, "en-US");
        assert_eq!(
            message.translation(&LangCode::new("EN-US")),
            Some(&Translation::Text("hello".into()))
        );
        assert_eq!(
            message.translation(&LangCode::new("IT")),
            Some(&Translation::Text("hello [IT]".into()))
        );
        assert_eq!(ingested.recipients, vec![speaker, viewer]);
        drop(ingested);

        assert_eq!(registry.room("r1").await.unwrap().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_non_speaker_rejected() {
        let (registry, pipeline, _) = setup(FakeTranslator::default()).await;
        let viewer = ConnId::new();

        let err = pipeline.ingest("r1", viewer, "hello", "en-US").await.unwrap_err();

        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(registry.room("r1").await.unwrap().messages().is_empty());
    }

    #[tokio::test]
    async fn test_blank_text_rejected() {
        let (registry, pipeline, speaker) = setup(FakeTranslator::default()).await;

        let err = pipeline.ingest("r1", speaker, "  \n", "en-US").await.unwrap_err();

        assert_eq!(err, Error::EmptyInput("Transcript"));
        assert!(registry.room("r1").await.unwrap().messages().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room() {
        let (_, pipeline, speaker) = setup(FakeTranslator::default()).await;
        let err = pipeline.ingest("nope", speaker, "hi", "en-US").await.unwrap_err();
        assert_eq!(err, Error::RoomNotFound);
    }

    #[tokio::test]
    async fn test_failed_target_does_not_block_message() {
        let fake = FakeTranslator::default().failing("CS", TranslateError::RateLimited);
        let (_, pipeline, speaker) = setup(fake).await;

        let ingested = pipeline.ingest("r1", speaker, "hello", "en-US").await.unwrap();

        assert!(ingested.message.translation(&LangCode::new("CS")).unwrap().error().is_some());
        assert!(ingested.message.translation(&LangCode::new("IT")).unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_submission_order_survives_slow_fan_out() {
        let fake = FakeTranslator::default().slow_on("first", Duration::from_millis(150));
        let (registry, pipeline, speaker) = setup(fake).await;

        let deliver = |text: &'static str| {
            let pipeline = &pipeline;
            async move {
                let ingested = pipeline.ingest("r1", speaker, text, "en-US").await.unwrap();
                ingested.message.text.clone()
            }
        };
        let (a, b, c) = tokio::join!(deliver("first"), deliver("second"), deliver("third"));
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("first", "second", "third"));

        let texts: Vec<_> = registry
            .room("r1")
            .await
            .unwrap()
            .messages()
            .iter()
            .map(|m| m.text.clone())
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_speaker_leaving_mid_fan_out_still_appends() {
        let fake = FakeTranslator::default().slow_on("hello", Duration::from_millis(100));
        let (registry, pipeline, speaker) = setup(fake).await;

        let in_flight = pipeline.ingest("r1", speaker, "hello", "en-US");
        let vacate = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.write().await.room_mut("r1").unwrap().clear_speaker();
        };
        let (ingested, ()) = tokio::join!(in_flight, vacate);
        drop(ingested.unwrap());

        assert_eq!(registry.room("r1").await.unwrap().messages().len(), 1);
        let err = pipeline.ingest("r1", speaker, "again", "en-US").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_recreated_room_never_receives_stale_message() {
        let fake = FakeTranslator::default().slow_on("stale", Duration::from_millis(100));
        let (registry, pipeline, speaker) = setup(fake).await;
        let successor = ConnId::new();

        let in_flight = pipeline.ingest("r1", speaker, "stale", "en-US");
        let recreate = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut state = registry.write().await;
            state.remove("r1");
            state.insert(Room::new("r1".into(), "pw2", Some(successor)).unwrap());
        };
        let (result, ()) = tokio::join!(in_flight, recreate);

        assert_eq!(result.unwrap_err(), Error::RoomNotFound);
        let room = registry.room("r1").await.unwrap();
        assert!(room.messages().is_empty());
        assert!(room.is_speaker(successor));
    }

    #[tokio::test]
    async fn test_queued_ingest_rejected_after_room_recreated() {
        let fake = FakeTranslator::default().slow_on("first", Duration::from_millis(100));
        let (registry, pipeline, speaker) = setup(fake).await;

        let first = async {
            let ingested = pipeline.ingest("r1", speaker, "first", "en-US").await;
            // Replace the room while the turn is still held
            {
                let mut state = registry.write().await;
                state.remove("r1");
                state.insert(Room::new("r1".into(), "pw2", Some(speaker)).unwrap());
            }
            drop(ingested);
        };
        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pipeline.ingest("r1", speaker, "second", "en-US").await
        };
        let ((), second) = tokio::join!(first, second);

        assert_eq!(second.unwrap_err(), Error::RoomNotFound);
        assert!(registry.room("r1").await.unwrap().messages().is_empty());
    }
}
