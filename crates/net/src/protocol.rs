//! Network protocol message types
//!
//! All messages are JSON objects tagged by `type` and length-prefixed on the
//! wire. Requests that expect an answer carry a client-chosen `request_id`
//! which the server echoes back.

use parla_core::{LangCode, Message, RoomSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client → server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Pre-register a room without taking the speaker slot
    CreateRoom {
        request_id: u64,
        room_id: String,
        password: String,
    },

    /// Join as speaker (password required) or as viewer
    JoinRoom {
        request_id: u64,
        room_id: String,
        #[serde(default)]
        password: Option<String>,
        is_speaker: bool,
        #[serde(default)]
        admin_secret: Option<String>,
    },

    /// Ask for the room directory
    GetRooms { request_id: u64 },

    /// An utterance from the speaker; answered by a broadcast or an error
    TranscribeData {
        room_id: String,
        transcript: String,
        source_lang: String,
    },

    /// Fetch a stored translation of one message
    RequestTranslation {
        room_id: String,
        message_id: Uuid,
        target_lang: LangCode,
    },

    Ping,
}

/// Server → client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    CreateRoomResult {
        request_id: u64,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    JoinRoomResult {
        request_id: u64,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(default)]
        is_speaker: bool,
        /// Room history, oldest first
        #[serde(default)]
        messages: Vec<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    RoomList {
        request_id: u64,
        rooms: Vec<RoomSummary>,
    },

    /// A stored utterance, sent to every participant of the room
    NewTranscription(Message),

    /// Sent to the submitting connection only
    TranscriptionError { error: String },

    TranslatedMessage {
        original_message_id: Uuid,
        translated_text: String,
        target_lang: LangCode,
    },

    TranslationError {
        message_id: Uuid,
        error: String,
        target_lang: LangCode,
    },

    SpeakerLeft { message: String },

    /// Directory snapshot, pushed to every connection
    RoomsUpdated { rooms: Vec<RoomSummary> },

    Pong,

    ServerShutdown,
}

impl ServerMessage {
    pub(crate) fn join_failed(request_id: u64, reason: String) -> Self {
        ServerMessage::JoinRoomResult {
            request_id,
            success: false,
            room_id: None,
            is_speaker: false,
            messages: Vec::new(),
            message: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_optional_fields() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join_room",
            "request_id": 7,
            "room_id": "r1",
            "is_speaker": false
        }))
        .unwrap();

        match msg {
            ClientMessage::JoinRoom {
                request_id,
                password,
                admin_secret,
                is_speaker,
                ..
            } => {
                assert_eq!(request_id, 7);
                assert!(!is_speaker);
                assert_eq!(password, None);
                assert_eq!(admin_secret, None);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_new_transcription_is_flat() {
        let message = Message::new("hello".into(), "en-US".into());
        let json = serde_json::to_value(ServerMessage::NewTranscription(message)).unwrap();

        assert_eq!(json["type"], "new_transcription");
        assert_eq!(json["text"], "hello");
        assert!(json["translations"].is_object());
    }

    #[test]
    fn test_request_translation_uppercases_target() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "request_translation",
            "room_id": "r1",
            "message_id": Uuid::nil(),
            "target_lang": "it"
        }))
        .unwrap();

        assert!(matches!(
            msg,
            ClientMessage::RequestTranslation { target_lang, .. } if target_lang == LangCode::new("IT")
        ));
    }
}
