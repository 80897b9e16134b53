use anyhow::{Context, Result};
use fanfeed::config::Config;
use fanfeed::docstore::AppwriteStore;
use fanfeed::feed::FeedLoader;
use fanfeed::server::{self, AppState};
use fanfeed::storage::FileStore;
use fanfeed::translation::{
    MyMemoryProvider, TranslationCache, TranslationQueue, TranslationSettings, Translator,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fanfeed=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    info!("Starting fanfeed ({})", config.environment);

    let client = reqwest::Client::new();

    let storage = FileStore::open(config.storage_path())
        .await
        .context("Failed to open translation storage")?;
    let cache = Arc::new(TranslationCache::open(Arc::new(storage)).await);

    let provider = MyMemoryProvider::from_config(client.clone(), &config);
    let translator = Arc::new(Translator::new(
        Arc::new(provider),
        TranslationSettings::from_config(&config),
    ));
    let queue = TranslationQueue::new(cache, translator, config.translation_pacing());

    let documents = Arc::new(AppwriteStore::from_config(client, &config));
    let loader = Arc::new(FeedLoader::from_config(documents, &config));

    // The feed can be refreshed later; start empty rather than refuse to boot.
    match loader.load_mixed().await {
        Ok(items) => {
            info!("Initial feed has {} items", items.len());
            queue.replace_items(items);
        }
        Err(e) => warn!("Initial feed load failed: {:#}", e),
    }

    let state = AppState {
        queue,
        loader,
        api_key: config.api_key.clone(),
    };
    server::serve(state, config.port).await
}
