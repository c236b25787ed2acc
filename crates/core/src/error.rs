//! Error types for Parla Core

use thiserror::Error;

/// Failures surfaced to the connection that caused them.
///
/// The `Display` text of each variant is the reason string sent back over
/// the wire, so it must never contain secrets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Room not found.")]
    RoomNotFound,

    #[error("Room ID already exists. Try joining as speaker.")]
    RoomExists,

    #[error("Invalid room password for speaker access.")]
    InvalidPassword,

    #[error("Valid admin secret required to create a new room.")]
    InvalidAdminSecret,

    #[error("New room creation is currently disabled by server configuration.")]
    CreationDisabled,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} must not be empty.")]
    EmptyInput(&'static str),

    #[error("Unsupported target language: {0}")]
    UnsupportedLanguage(String),

    #[error("Message not found")]
    MessageNotFound,

    #[error("Translation not available or not found for {0}")]
    TranslationNotFound(String),

    #[error("Translation to {lang} previously failed: {reason}")]
    TranslationUnavailable { lang: String, reason: String },

    #[error("Translation service not configured.")]
    GatewayUnconfigured,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

impl Error {
    /// Lookup failures: the room, message, or language slot does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RoomNotFound
                | Error::MessageNotFound
                | Error::TranslationNotFound(_)
                | Error::UnsupportedLanguage(_)
        )
    }

    pub(crate) fn not_speaker() -> Self {
        Error::Unauthorized("Not the speaker".into())
    }

    pub(crate) fn not_member() -> Self {
        Error::Unauthorized("Not a participant of this room".into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family() {
        assert!(Error::RoomNotFound.is_not_found());
        assert!(Error::MessageNotFound.is_not_found());
        assert!(Error::TranslationNotFound("IT".into()).is_not_found());
        assert!(Error::UnsupportedLanguage("DE".into()).is_not_found());
        assert!(!Error::TranslationUnavailable {
            lang: "IT".into(),
            reason: "quota".into()
        }
        .is_not_found());
        assert!(!Error::InvalidPassword.is_not_found());
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(
            Error::not_speaker().to_string(),
            "Unauthorized: Not the speaker"
        );
        assert_eq!(
            Error::EmptyInput("Transcript").to_string(),
            "Transcript must not be empty."
        );
    }
}
