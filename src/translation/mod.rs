//! On-device style translation of feed text.
//!
//! Translating every post up front would hammer a free, rate-limited
//! provider, so translation is driven by what the reader has actually
//! scrolled past and memoized forever once done.
//!
//! # Architecture
//!
//! - `cache`: persisted id -> translated text mapping, loaded once, written through
//! - `provider`: remote provider call with truncation and pass-through on failure
//! - `visibility`: insertion-ordered set of ids that have been rendered
//! - `queue`: the serial, paced drain pass tying the three together
//! - `metrics`: per-queue counters for cache hits and provider calls
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = Arc::new(TranslationCache::open(store).await);
//! let translator = Arc::new(Translator::new(provider, TranslationSettings::default()));
//! let queue = TranslationQueue::new(cache, translator, Duration::from_millis(200));
//!
//! queue.replace_items(feed_items);
//! queue.mark_rendered("post-1");
//! if let Some(pass) = queue.set_translation_mode(true) {
//!     let report = pass.await?;
//! }
//! ```

mod cache;
mod metrics;
mod provider;
mod queue;
mod visibility;

pub use cache::{TranslationCache, TRANSLATION_STORAGE_KEY};
pub use metrics::{MetricsReport, TranslationMetrics};
pub use provider::{
    truncate_chars, MyMemoryProvider, Translation, TranslationProvider, TranslationSettings,
    Translator, TRUNCATION_MARKER,
};
pub use queue::{DrainReport, TranslationQueue};
pub use visibility::VisibilityTracker;

/// Anything the queue can translate.
///
/// Items without body text (video clips) return `None` from
/// `translatable_text` and are skipped by the drain pass.
pub trait Translatable {
    fn item_id(&self) -> &str;
    fn translatable_text(&self) -> Option<&str>;
}
