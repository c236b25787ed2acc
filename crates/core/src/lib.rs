//! Parla Core Library
//!
//! Room coordination for live "one speaker, many viewers" sessions: role
//! arbitration, translation fan-out, ordered ingestion and presence.

pub mod authority;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod invariants;
pub mod models;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod translation;

pub use authority::{JoinOutcome, SessionAuthority};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use directory::RoomDirectory;
pub use error::{Error, Result};
pub use models::*;
pub use pipeline::{Ingested, TranscriptionPipeline};
pub use presence::{Departure, PresenceTracker, SpeakerLeftPolicy};
pub use registry::RoomRegistry;
pub use translation::{DeepLTranslator, TranslateError, TranslationGateway, Translator};
