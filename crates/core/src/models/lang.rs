//! Language codes
//!
//! Speakers declare dialect tags such as `en-US`; the translation backend
//! works with upper-case codes such as `EN`, `EN-US` or `IT`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Known speaker dialect tags and their canonical source codes
const SOURCE_ALIASES: &[(&str, &str)] = &[("en-US", "EN"), ("it-IT", "IT"), ("cs-CZ", "CS")];

/// An upper-case language code as understood by the translation backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct LangCode(String);

impl LangCode {
    /// Build a code from any casing; surrounding whitespace is dropped
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    /// Map a speaker's dialect tag to the canonical source code.
    ///
    /// Unknown tags fall back to their first two characters.
    pub fn from_source_tag(tag: &str) -> Self {
        let tag = tag.trim();
        if let Some((_, code)) = SOURCE_ALIASES.iter().find(|(alias, _)| *alias == tag) {
            return Self((*code).to_string());
        }
        Self(tag.chars().take(2).collect::<String>().to_ascii_uppercase())
    }

    /// Whether `self` (a target) denotes the same language as `source`.
    ///
    /// `EN-US` and `EN` match in either direction.
    pub fn is_same_language(&self, source: &LangCode) -> bool {
        if self.0.is_empty() || source.0.is_empty() {
            return false;
        }
        self.0.starts_with(&source.0) || source.0.starts_with(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LangCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LangCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for LangCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}
