use crate::config::Config;
use crate::docstore::{Document, DocumentStore, Query, CREATED_AT_ATTRIBUTE};
use crate::retry::{is_transient_http_error, with_retry_if, RetryConfig};
use crate::translation::Translatable;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// A scraped social post. Text is usually Japanese.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub tweet_id: String,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, deserialize_with = "lenient_media_urls")]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub url: String,
}

/// Stored as a JSON-encoded string array; accept a plain array too.
fn lenient_media_urls<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(raw)) => parse_media_urls(&raw),
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        _ => Vec::new(),
    })
}

/// Decode a JSON array of URLs. Anything malformed yields an empty list.
pub fn parse_media_urls(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str(raw).unwrap_or_default()
}

/// A short video entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaClip {
    #[serde(rename = "$id")]
    pub id: String,
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_icon: Option<String>,
}

impl MediaClip {
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }

    pub fn shorts_url(&self) -> String {
        format!("https://youtube.com/shorts/{}", self.video_id)
    }

    pub fn thumbnail_url(&self) -> String {
        format!("https://img.youtube.com/vi/{}/maxresdefault.jpg", self.video_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedItem {
    Post(SocialPost),
    Clip(MediaClip),
}

impl FeedItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Post(post) => &post.id,
            Self::Clip(clip) => &clip.id,
        }
    }

    pub fn is_post(&self) -> bool {
        matches!(self, Self::Post(_))
    }
}

impl Translatable for SocialPost {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn translatable_text(&self) -> Option<&str> {
        Some(&self.text)
    }
}

impl Translatable for FeedItem {
    fn item_id(&self) -> &str {
        self.id()
    }

    fn translatable_text(&self) -> Option<&str> {
        match self {
            Self::Post(post) => Some(&post.text),
            Self::Clip(_) => None,
        }
    }
}

/// Shuffle posts and clips together.
pub fn mix<R: Rng + ?Sized>(posts: Vec<SocialPost>, clips: Vec<MediaClip>, rng: &mut R) -> Vec<FeedItem> {
    let mut items: Vec<FeedItem> = posts
        .into_iter()
        .map(FeedItem::Post)
        .chain(clips.into_iter().map(FeedItem::Clip))
        .collect();
    items.shuffle(rng);
    items
}

/// Reads the newest page of posts and clips from the document store.
pub struct FeedLoader {
    store: Arc<dyn DocumentStore>,
    posts_collection: String,
    clips_collection: String,
    page_size: u32,
    retry: RetryConfig,
}

impl FeedLoader {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        posts_collection: impl Into<String>,
        clips_collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            posts_collection: posts_collection.into(),
            clips_collection: clips_collection.into(),
            page_size: 10,
            retry: RetryConfig::document_store(),
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self::new(
            store,
            &config.posts_collection_id,
            &config.clips_collection_id,
        )
        .with_page_size(config.feed_page_size)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Newest posts first.
    pub async fn load_posts(&self) -> Result<Vec<SocialPost>> {
        let queries = [Query::order_desc("created_at"), Query::limit(self.page_size)];
        let docs = self.list(&self.posts_collection, &queries).await?;
        let posts = decode_all(docs);
        info!("Loaded {} posts", posts.len());
        Ok(posts)
    }

    /// Newest clips first, by creation time in the store.
    pub async fn load_clips(&self) -> Result<Vec<MediaClip>> {
        let queries = [
            Query::order_desc(CREATED_AT_ATTRIBUTE),
            Query::limit(self.page_size),
        ];
        let docs = self.list(&self.clips_collection, &queries).await?;
        let clips = decode_all(docs);
        info!("Loaded {} clips", clips.len());
        Ok(clips)
    }

    /// Posts only, in store order, as feed items.
    pub async fn load_post_feed(&self) -> Result<Vec<FeedItem>> {
        Ok(self
            .load_posts()
            .await?
            .into_iter()
            .map(FeedItem::Post)
            .collect())
    }

    /// Both sources fetched concurrently, then shuffled together.
    pub async fn load_mixed(&self) -> Result<Vec<FeedItem>> {
        let (posts, clips) = futures::try_join!(self.load_posts(), self.load_clips())?;
        let mut rng = rand::thread_rng();
        Ok(mix(posts, clips, &mut rng))
    }

    async fn list(&self, collection: &str, queries: &[Query]) -> Result<Vec<Document>> {
        with_retry_if(
            &self.retry,
            &format!("List {}", collection),
            || self.store.list_documents(collection, queries),
            is_transient_http_error,
        )
        .await
    }
}

/// Decode every document, dropping (and logging) the ones that don't fit.
fn decode_all<T: DeserializeOwned>(docs: Vec<Document>) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed document: {:#}", e);
                None
            }
        })
        .collect()
}
