//! DeepL backend for the translation gateway

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{TranslateError, Translator};
use crate::models::LangCode;

pub const DEEPL_FREE_URL: &str = "https://api-free.deepl.com/v2/translate";
pub const DEEPL_PRO_URL: &str = "https://api.deepl.com/v2/translate";

/// DeepL answers 456 when the character quota is used up
const QUOTA_EXCEEDED: u16 = 456;

/// DeepL REST client
pub struct DeepLTranslator {
    auth_key: String,
    api_url: String,
    http: reqwest::Client,
}

impl DeepLTranslator {
    /// Build a client; free-tier keys (suffix `:fx`) get the free endpoint
    /// unless `api_url` overrides it.
    pub fn new(auth_key: String, api_url: Option<String>) -> Result<Self, TranslateError> {
        let api_url = api_url.unwrap_or_else(|| endpoint_for_key(&auth_key).to_string());
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        Ok(Self {
            auth_key,
            api_url,
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

fn endpoint_for_key(auth_key: &str) -> &'static str {
    if auth_key.ends_with(":fx") {
        DEEPL_FREE_URL
    } else {
        DEEPL_PRO_URL
    }
}

fn build_request_body(text: &str, source: &LangCode, target: &LangCode) -> Value {
    json!({
        "text": [text],
        "source_lang": source.as_str(),
        "target_lang": target.as_str(),
    })
}

fn parse_response(json: &Value) -> Result<String, TranslateError> {
    json["translations"]
        .as_array()
        .and_then(|items| items.first())
        .and_then(|item| item["text"].as_str())
        .map(str::to_string)
        .ok_or_else(|| TranslateError::Parse("missing translations[0].text".into()))
}

#[async_trait]
impl Translator for DeepLTranslator {
    async fn translate(
        &self,
        text: &str,
        source: &LangCode,
        target: &LangCode,
    ) -> Result<String, TranslateError> {
        debug!(source = %source, target = %target, "DeepL request");

        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.auth_key))
            .json(&build_request_body(text, source, target))
            .send()
            .await
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TranslateError::RateLimited);
        }
        if status.as_u16() == QUOTA_EXCEEDED {
            return Err(TranslateError::QuotaExceeded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = body.chars().take(200).collect::<String>();
            return Err(TranslateError::Api(format!("HTTP {status}: {body}")));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| TranslateError::Parse(e.to_string()))?;
        parse_response(&json)
    }
}
