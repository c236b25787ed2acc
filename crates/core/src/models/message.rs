//! Transcribed utterances and their translations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LangCode;

/// Outcome of one translation attempt.
///
/// Serializes as `{"text": ...}` or `{"error": ...}`, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Translation {
    Text(String),
    Error(String),
}

impl Translation {
    pub fn is_ok(&self) -> bool {
        matches!(self, Translation::Text(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Translation::Text(text) => Some(text),
            Translation::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Translation::Text(_) => None,
            Translation::Error(reason) => Some(reason),
        }
    }
}

/// A transcribed utterance stored in a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Original utterance, verbatim
    pub text: String,
    /// Dialect tag as declared by the speaker's client
    pub source_lang: String,
    translations: BTreeMap<LangCode, Translation>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(text: String, source_lang: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            source_lang,
            translations: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_translations(
        mut self,
        translations: impl IntoIterator<Item = (LangCode, Translation)>,
    ) -> Self {
        for (lang, outcome) in translations {
            self.fill_translation(lang, outcome);
        }
        self
    }

    /// Record the outcome for `lang` unless one is already present.
    ///
    /// Returns false when the slot was already filled; the existing value is kept.
    pub fn fill_translation(&mut self, lang: LangCode, outcome: Translation) -> bool {
        if self.translations.contains_key(&lang) {
            return false;
        }
        self.translations.insert(lang, outcome);
        true
    }

    pub fn translation(&self, lang: &LangCode) -> Option<&Translation> {
        self.translations.get(lang)
    }

    pub fn translations(&self) -> &BTreeMap<LangCode, Translation> {
        &self.translations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_idempotent() {
        let mut msg = Message::new("hello".into(), "en-US".into());
        assert!(msg.fill_translation(LangCode::new("IT"), Translation::Text("ciao".into())));
        assert!(!msg.fill_translation(LangCode::new("IT"), Translation::Error("late".into())));
        assert_eq!(
            msg.translation(&LangCode::new("IT")),
            Some(&Translation::Text("ciao".into()))
        );
    }

    #[test]
    fn test_translation_wire_shape() {
        let ok = serde_json::to_value(Translation::Text("ahoj".into())).unwrap();
        assert_eq!(ok, serde_json::json!({ "text": "ahoj" }));

        let failed = serde_json::to_value(Translation::Error("quota".into())).unwrap();
        assert_eq!(failed, serde_json::json!({ "error": "quota" }));
    }

    #[test]
    fn test_message_serializes_translations_by_code() {
        let msg = Message::new("hello".into(), "en-US".into()).with_translations([
            (LangCode::new("EN-US"), Translation::Text("hello".into())),
            (LangCode::new("CS"), Translation::Error("timeout".into())),
        ]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["translations"]["EN-US"]["text"], "hello");
        assert_eq!(json["translations"]["CS"]["error"], "timeout");
        assert_eq!(json["source_lang"], "en-US");
    }
}
