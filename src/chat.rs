//! Chat assistant: REST client for the chat backend, plus direct messages
//! kept in the document store.

use crate::config::Config;
use crate::docstore::{fields, new_document_id, DocumentStore, Query};
use crate::retry::{is_transient_http_error, with_retry_if, RetryConfig};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Longest message body shown in a conversation preview before cutting.
pub const PREVIEW_MAX_CHARS: usize = 30;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// One turn of assistant chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: Value,
    pub content: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

/// Client for the chat assistant's REST API. Every response is wrapped as
/// `{"data": ...}`.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl ChatClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::document_store(),
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(client, &config.chat_api_url)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Send a message and return the assistant's reply. Not retried.
    pub async fn send_message(&self, user_id: &str, message: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/send", self.base_url))
            .json(&json!({ "userId": user_id, "message": message }))
            .send()
            .await
            .context("Failed to send chat message")?;
        let reply: String = unwrap_envelope(response).await?;
        debug!("Chat reply for {}: {} chars", user_id, reply.chars().count());
        Ok(reply)
    }

    /// Most recent first.
    pub async fn history(&self, user_id: &str, limit: u32) -> Result<Vec<HistoryEntry>> {
        self.get(&format!("/chat/history/{}?limit={}", user_id, limit))
            .await
    }

    pub async fn welcome_message(&self) -> Result<String> {
        self.get("/chat/welcome").await
    }

    pub async fn example_commands(&self) -> Result<Vec<String>> {
        self.get("/chat/examples").await
    }

    pub async fn health(&self) -> Result<Value> {
        self.get("/health").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        let client = &self.client;
        with_retry_if(
            &self.retry,
            &format!("Chat GET {}", path),
            || async move {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .context("Failed to reach chat API")?;
                unwrap_envelope(response).await
            },
            is_transient_http_error,
        )
        .await
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Chat API error ({}): {}", status, body);
    }
    let envelope: Envelope<T> = response
        .json()
        .await
        .context("Failed to parse chat API response")?;
    Ok(envelope.data)
}

/// Preview line for a conversation list: own messages get a `You: ` prefix,
/// long bodies are cut to [`PREVIEW_MAX_CHARS`] characters plus `...`.
pub fn preview_text(message: &str, from_user: bool) -> String {
    let prefix = if from_user { "You: " } else { "" };
    if message.chars().count() > PREVIEW_MAX_CHARS {
        let cut: String = message.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{}{}...", prefix, cut)
    } else {
        format!("{}{}", prefix, message)
    }
}

pub fn conversation_preview(last: Option<&HistoryEntry>) -> String {
    match last {
        Some(entry) => preview_text(&entry.content, entry.is_user()),
        None => "No messages yet. Start a conversation!".to_string(),
    }
}

/// Direct message document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "$id")]
    pub id: String,
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: Option<String>,
    pub message: String,
    pub created_at: String,
}

impl ChatMessage {
    /// The other side of the conversation from `user_id`'s point of view.
    pub fn partner_of(&self, user_id: &str) -> Option<&str> {
        if self.sender_id == user_id {
            self.receiver_id.as_deref()
        } else {
            Some(&self.sender_id)
        }
    }
}

/// Direct messages between users and characters.
pub struct MessageStore {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl MessageStore {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub async fn send(&self, sender_id: &str, receiver_id: &str, message: &str) -> Result<ChatMessage> {
        let doc = self
            .store
            .create_document(
                &self.collection,
                &new_document_id(),
                fields(json!({
                    "sender_id": sender_id,
                    "receiver_id": receiver_id,
                    "message": message,
                    "created_at": Utc::now().to_rfc3339(),
                })),
            )
            .await
            .context("Failed to send message")?;
        info!("Message {} sent to {}", doc.id, receiver_id);
        doc.decode()
    }

    /// Both directions between two parties, oldest first.
    pub async fn conversation(&self, user_id: &str, other_id: &str) -> Result<Vec<ChatMessage>> {
        let queries = [
            Query::or(vec![
                Query::and(vec![
                    Query::equal("sender_id", user_id),
                    Query::equal("receiver_id", other_id),
                ]),
                Query::and(vec![
                    Query::equal("sender_id", other_id),
                    Query::equal("receiver_id", user_id),
                ]),
            ]),
            Query::order_asc("created_at"),
        ];
        let docs = self
            .store
            .list_documents(&self.collection, &queries)
            .await
            .context("Failed to load conversation")?;
        docs.iter().map(|doc| doc.decode()).collect()
    }

    /// Latest message per conversation partner, newest first.
    pub async fn latest_per_partner(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        let queries = [
            Query::or(vec![
                Query::equal("sender_id", user_id),
                Query::equal("receiver_id", user_id),
            ]),
            Query::order_desc("created_at"),
        ];
        let docs = self
            .store
            .list_documents(&self.collection, &queries)
            .await
            .context("Failed to load conversations")?;

        let mut latest: HashMap<String, ChatMessage> = HashMap::new();
        for doc in &docs {
            let msg: ChatMessage = doc.decode()?;
            let Some(partner) = msg.partner_of(user_id).map(str::to_owned) else {
                continue;
            };
            match latest.get(&partner) {
                Some(existing) if existing.created_at >= msg.created_at => {}
                _ => {
                    latest.insert(partner, msg);
                }
            }
        }

        let mut result: Vec<ChatMessage> = latest.into_values().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}
