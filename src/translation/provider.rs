use crate::config::Config;
use crate::retry::{is_transient_http_error, with_retry_if, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Appended to a translation whose input had to be cut short.
pub const TRUNCATION_MARKER: &str = "...";

/// Remote text translation.
///
/// Implementations return an error for anything that is not a usable
/// translation; [`Translator`] turns those errors into a pass-through.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn request(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// MyMemory response body. Only the fields we read.
#[derive(Debug, Deserialize)]
struct MyMemoryResponse {
    #[serde(rename = "responseData")]
    response_data: Option<ResponseData>,
    /// Sometimes a number, sometimes a numeric string.
    #[serde(rename = "responseStatus")]
    response_status: Option<serde_json::Value>,
    #[serde(rename = "responseDetails")]
    response_details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
}

fn response_status_code(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// MyMemory-compatible provider: `GET <url>?q=<text>&langpair=<src>|<tgt>`.
#[derive(Debug, Clone)]
pub struct MyMemoryProvider {
    client: reqwest::Client,
    api_url: String,
    retry: RetryConfig,
}

impl MyMemoryProvider {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            retry: RetryConfig::translation(),
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(client, config.translation_api_url.clone())
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn request_once(&self, text: &str, langpair: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("q", text), ("langpair", langpair)])
            .send()
            .await
            .context("Failed to send translation request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            anyhow::bail!("Translation API error ({}): {}", status, body);
        }

        let body: MyMemoryResponse = response
            .json()
            .await
            .context("Failed to parse translation response")?;

        // MyMemory reports quota and validation problems in the body with a 200.
        if let Some(code) = body.response_status.as_ref().and_then(response_status_code) {
            if code != 200 {
                anyhow::bail!(
                    "Translation API error ({}): {}",
                    code,
                    body.response_details.unwrap_or_default()
                );
            }
        }

        body.response_data
            .and_then(|data| data.translated_text)
            .filter(|t| !t.is_empty())
            .context("Translation response contained no translated text")
    }
}

#[async_trait]
impl TranslationProvider for MyMemoryProvider {
    async fn request(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let langpair = format!("{}|{}", source_lang, target_lang);
        with_retry_if(
            &self.retry,
            &format!("Translation {}", langpair),
            || self.request_once(text, &langpair),
            is_retryable_error,
        )
        .await
    }
}

/// Retry 429 and 5xx and transport failures. A body with no translated
/// text will not get better by asking again.
fn is_retryable_error(error: &anyhow::Error) -> bool {
    if error.to_string().contains("no translated text") {
        return false;
    }
    is_transient_http_error(error)
}

/// Language pair and input limit for [`Translator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationSettings {
    pub source_lang: String,
    pub target_lang: String,
    /// Inputs longer than this many characters are truncated before submission.
    pub max_chars: usize,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            max_chars: 450,
        }
    }
}

impl TranslationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_lang: config.translation_source_lang.clone(),
            target_lang: config.translation_target_lang.clone(),
            max_chars: config.translation_max_chars,
        }
    }
}

/// Outcome of one [`Translator`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    /// The provider answered; `...` already appended if the input was cut.
    Translated(String),
    /// The provider failed; this is the untouched original input.
    Fallback(String),
}

impl Translation {
    pub fn text(&self) -> &str {
        match self {
            Self::Translated(t) | Self::Fallback(t) => t,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Translated(t) | Self::Fallback(t) => t,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Cut `text` to at most `max_chars` characters. Returns the prefix and
/// whether anything was removed.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

/// The translation provider adapter: truncation on the way in, ellipsis
/// and failure pass-through on the way out. Never fails its caller.
pub struct Translator {
    provider: Arc<dyn TranslationProvider>,
    settings: TranslationSettings,
}

impl Translator {
    pub fn new(provider: Arc<dyn TranslationProvider>, settings: TranslationSettings) -> Self {
        Self { provider, settings }
    }

    /// Translate `text`, returning the original on any failure.
    pub async fn translate(&self, text: &str) -> String {
        self.translate_with_outcome(text).await.into_text()
    }

    pub async fn translate_with_outcome(&self, text: &str) -> Translation {
        let (input, truncated) = truncate_chars(text, self.settings.max_chars);
        if truncated {
            debug!(
                "Truncated translation input from {} to {} characters",
                text.chars().count(),
                self.settings.max_chars
            );
        }

        match self
            .provider
            .request(input, &self.settings.source_lang, &self.settings.target_lang)
            .await
        {
            Ok(translated) if truncated => {
                Translation::Translated(format!("{}{}", translated, TRUNCATION_MARKER))
            }
            Ok(translated) => Translation::Translated(translated),
            Err(e) => {
                warn!("Translation error, showing original text: {:#}", e);
                Translation::Fallback(text.to_string())
            }
        }
    }
}
