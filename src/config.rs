use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,

    // Document store (Appwrite-compatible REST API)
    pub docstore_endpoint: String,
    pub docstore_project_id: String,
    pub docstore_api_key: Option<String>,
    pub database_id: String,
    pub posts_collection_id: String,
    pub clips_collection_id: String,
    pub todo_collection_id: String,
    pub users_collection_id: String,
    pub messages_collection_id: String,
    pub feed_page_size: u32,

    // Translation
    pub translation_api_url: String,
    pub translation_source_lang: String,
    pub translation_target_lang: String,
    pub translation_max_chars: usize,
    pub translation_pacing_ms: u64,

    // Durable key-value storage
    pub storage_dir: String,

    // Chat backend
    pub chat_api_url: String,

    // Server
    pub api_key: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),

            // Document store
            docstore_endpoint: std::env::var("DOCSTORE_ENDPOINT")
                .context("DOCSTORE_ENDPOINT not set")?,
            docstore_project_id: std::env::var("DOCSTORE_PROJECT_ID")
                .context("DOCSTORE_PROJECT_ID not set")?,
            docstore_api_key: non_empty_var("DOCSTORE_API_KEY"),
            database_id: std::env::var("DATABASE_ID").context("DATABASE_ID not set")?,
            posts_collection_id: std::env::var("POSTS_COLLECTION_ID")
                .unwrap_or_else(|_| "tweets_collection".to_string()),
            clips_collection_id: std::env::var("CLIPS_COLLECTION_ID")
                .unwrap_or_else(|_| "youtube_shorts".to_string()),
            todo_collection_id: std::env::var("TODO_COLLECTION_ID")
                .unwrap_or_else(|_| "todos".to_string()),
            users_collection_id: std::env::var("USERS_COLLECTION_ID")
                .unwrap_or_else(|_| "users".to_string()),
            messages_collection_id: std::env::var("MESSAGES_COLLECTION_ID")
                .unwrap_or_else(|_| "messages".to_string()),
            feed_page_size: parsed_var("FEED_PAGE_SIZE").unwrap_or(10),

            // Translation
            translation_api_url: std::env::var("TRANSLATION_API_URL")
                .unwrap_or_else(|_| "https://api.mymemory.translated.net/get".to_string()),
            translation_source_lang: std::env::var("TRANSLATION_SOURCE_LANG")
                .unwrap_or_else(|_| "ja".to_string()),
            translation_target_lang: std::env::var("TRANSLATION_TARGET_LANG")
                .unwrap_or_else(|_| "en".to_string()),
            translation_max_chars: parsed_var("TRANSLATION_MAX_CHARS").unwrap_or(450),
            translation_pacing_ms: parsed_var("TRANSLATION_PACING_MS").unwrap_or(200),

            storage_dir: std::env::var("STORAGE_DIR")
                .unwrap_or_else(|_| "data/storage".to_string()),

            chat_api_url: std::env::var("CHAT_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api".to_string()),

            api_key: non_empty_var("API_KEY"),
            port: parsed_var("PORT").unwrap_or(3000),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn translation_pacing(&self) -> Duration {
        Duration::from_millis(self.translation_pacing_ms)
    }

    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_dir)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
