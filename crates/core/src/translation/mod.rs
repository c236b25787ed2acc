//! Translation gateway
//!
//! Wraps the remote translation capability behind [`Translator`] and fans a
//! single utterance out to every configured target language. Each target is
//! attempted independently; one failure never affects the others.

mod deepl;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{LangCode, Room, Translation};

pub use deepl::{DeepLTranslator, DEEPL_FREE_URL, DEEPL_PRO_URL};

/// Default bound on a single remote call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure of one remote translation call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by translation service")]
    RateLimited,

    #[error("Translation quota exceeded")]
    QuotaExceeded,

    #[error("Translation API error: {0}")]
    Api(String),

    #[error("Unexpected translation response: {0}")]
    Parse(String),

    #[error("Translation timed out after {0:?}")]
    Timeout(Duration),
}

/// The remote translate capability
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source: &LangCode,
        target: &LangCode,
    ) -> std::result::Result<String, TranslateError>;
}

/// Fan-out front for an optional [`Translator`]
pub struct TranslationGateway {
    translator: Option<Arc<dyn Translator>>,
    targets: Vec<LangCode>,
    call_timeout: Duration,
}

impl TranslationGateway {
    pub fn new(translator: Arc<dyn Translator>, targets: Vec<LangCode>) -> Self {
        Self {
            translator: Some(translator),
            targets,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// A gateway with no backend; every target reports [`Error::GatewayUnconfigured`]
    pub fn unconfigured(targets: Vec<LangCode>) -> Self {
        Self {
            translator: None,
            targets,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.translator.is_some()
    }

    /// The fixed, ordered target set
    pub fn targets(&self) -> &[LangCode] {
        &self.targets
    }

    pub fn supports(&self, lang: &LangCode) -> bool {
        self.targets.contains(lang)
    }

    /// Translate into every configured target
    pub async fn fan_out_all(&self, text: &str, source_tag: &str) -> BTreeMap<LangCode, Translation> {
        self.fan_out(text, source_tag, &self.targets).await
    }

    /// One attempt per target, run concurrently, all awaited before returning
    pub async fn fan_out(
        &self,
        text: &str,
        source_tag: &str,
        targets: &[LangCode],
    ) -> BTreeMap<LangCode, Translation> {
        let Some(translator) = self.translator.as_deref() else {
            warn!("Translator not configured, skipping translation");
            let reason = Error::GatewayUnconfigured.to_string();
            return targets
                .iter()
                .map(|lang| (lang.clone(), Translation::Error(reason.clone())))
                .collect();
        };

        let source = LangCode::from_source_tag(source_tag);
        let attempts = targets.iter().map(|target| {
            let source = &source;
            async move {
                let outcome = self.attempt(translator, text, source, target).await;
                (target.clone(), outcome)
            }
        });

        join_all(attempts).await.into_iter().collect()
    }

    async fn attempt(
        &self,
        translator: &dyn Translator,
        text: &str,
        source: &LangCode,
        target: &LangCode,
    ) -> Translation {
        if target.is_same_language(source) {
            return Translation::Text(text.to_string());
        }

        let call = translator.translate(text, source, target);
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TranslateError::Timeout(self.call_timeout)),
        };

        match result {
            Ok(translated) => {
                debug!(source = %source, target = %target, "Translated");
                Translation::Text(translated)
            }
            Err(e) => {
                warn!(source = %source, target = %target, error = %e, "Translation failed");
                Translation::Error(e.to_string())
            }
        }
    }

    /// Serve a translation stored at ingestion; never calls the translator
    pub fn lookup_cached(room: &Room, message_id: Uuid, target: &LangCode) -> Result<String> {
        let message = room.message(message_id).ok_or(Error::MessageNotFound)?;
        match message.translation(target) {
            Some(Translation::Text(text)) => Ok(text.clone()),
            Some(Translation::Error(reason)) => Err(Error::TranslationUnavailable {
                lang: target.to_string(),
                reason: reason.clone(),
            }),
            None => Err(Error::TranslationNotFound(target.to_string())),
        }
    }
}
