//! Preview binary: loads the feed, translates every post the way the feed
//! screen would, and prints the result.
//!
//! Usage:
//!   cargo run --bin preview                 # Mixed feed (posts and clips)
//!   cargo run --bin preview -- --posts-only # Posts only, newest first
//!
//! Required environment variables:
//! - DOCSTORE_ENDPOINT
//! - DOCSTORE_PROJECT_ID
//! - DATABASE_ID
//!
//! Translations are stored under STORAGE_DIR (defaults to data/storage), so a
//! second run only calls the provider for new posts.

use anyhow::{Context, Result};
use chrono::Utc;
use fanfeed::config::Config;
use fanfeed::docstore::AppwriteStore;
use fanfeed::feed::{FeedItem, FeedLoader};
use fanfeed::storage::FileStore;
use fanfeed::translation::{
    MyMemoryProvider, TranslationCache, TranslationQueue, TranslationSettings, Translator,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn render(queue: &TranslationQueue<FeedItem>, item: &FeedItem) -> String {
    match item {
        FeedItem::Post(post) => {
            let text = queue.display_text(&post.id).unwrap_or_default();
            format!(
                "@{} ({})\n{}\n{}\n",
                post.username, post.created_at, text, post.url
            )
        }
        FeedItem::Clip(clip) => format!(
            "[clip] {}\n{}\n{}\nthumbnail: {}\n",
            clip.title,
            clip.shorts_url(),
            clip.watch_url(),
            clip.thumbnail_url()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fanfeed=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let posts_only = args.iter().any(|arg| arg == "--posts-only");

    info!("Loading configuration...");
    let config = Config::from_env()?;
    let client = reqwest::Client::new();

    let storage = FileStore::open(config.storage_path())
        .await
        .context("Failed to open translation storage")?;
    let cache = Arc::new(TranslationCache::open(Arc::new(storage)).await);
    let translator = Arc::new(Translator::new(
        Arc::new(MyMemoryProvider::from_config(client.clone(), &config)),
        TranslationSettings::from_config(&config),
    ));
    let queue = TranslationQueue::new(cache, translator, config.translation_pacing());

    let loader = FeedLoader::from_config(
        Arc::new(AppwriteStore::from_config(client, &config)),
        &config,
    );
    let items = if posts_only {
        loader.load_post_feed().await?
    } else {
        loader.load_mixed().await?
    };

    if items.is_empty() {
        println!("\n========== FEED IS EMPTY ==========\n");
        return Ok(());
    }

    queue.replace_items(items.clone());
    for item in &items {
        queue.mark_rendered(item.id());
    }

    info!("Translating {} items...", items.len());
    if let Some(pass) = queue.set_translation_mode(true) {
        let report = pass.await.context("Translation pass panicked")?;
        info!(
            "{} translated, {} fallbacks, {} already cached",
            report.translated, report.fallbacks, report.already_cached
        );
    }

    let rendered: Vec<String> = items.iter().map(|item| render(&queue, item)).collect();
    let body = rendered.join("\n");

    println!("\n========== FEED PREVIEW ==========\n");
    println!("{}", body);
    println!("==================================\n");

    let history_dir = Path::new("run-history");
    fs::create_dir_all(history_dir).context("Failed to create run-history directory")?;
    let filepath = history_dir.join(format!("feed_{}.md", Utc::now().format("%Y-%m-%d_%H-%M-%S")));
    let post_count = items.iter().filter(|item| item.is_post()).count();
    let metrics = serde_json::to_string_pretty(&queue.metrics())?;
    fs::write(
        &filepath,
        format!(
            "# Feed Preview - {}\n\n**Items:** {} ({} posts, {} clips)\n\n---\n\n{}\n\n---\n\n```json\n{}\n```\n",
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
            items.len(),
            post_count,
            items.len() - post_count,
            body,
            metrics
        ),
    )
    .context("Failed to write preview file")?;
    info!("Saved preview to {}", filepath.display());

    Ok(())
}
