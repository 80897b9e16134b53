use super::{MetricsReport, Translatable, TranslationCache, TranslationMetrics, Translator, VisibilityTracker};
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What one drain pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Number of ids in the visibility snapshot the pass started from
    pub snapshot_len: usize,
    /// Provider answered with a translation
    pub translated: usize,
    /// Provider failed; the original text was stored instead
    pub fallbacks: usize,
    /// Already had a cache entry
    pub already_cached: usize,
    /// Unknown id, nothing to translate, or already in flight
    pub skipped: usize,
    /// Translation mode was switched off before the snapshot was exhausted
    pub cancelled: bool,
}

struct ItemIndex<I> {
    items: Vec<I>,
    by_id: HashMap<String, usize>,
}

impl<I> Default for ItemIndex<I> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            by_id: HashMap::new(),
        }
    }
}

struct Inner<I> {
    cache: Arc<TranslationCache>,
    translator: Arc<Translator>,
    pacing: Duration,
    items: RwLock<ItemIndex<I>>,
    visibility: Mutex<VisibilityTracker>,
    in_flight: Mutex<HashSet<String>>,
    translation_mode: AtomicBool,
    draining: AtomicBool,
    metrics: TranslationMetrics,
}

/// Serial, paced translation of rendered feed items.
///
/// One queue per feed screen. At most one drain pass runs at a time; a
/// trigger that arrives while a pass is running is dropped, and whatever
/// became visible meanwhile waits for the next trigger. Cloning is cheap and
/// every clone drives the same queue.
pub struct TranslationQueue<I> {
    inner: Arc<Inner<I>>,
}

impl<I> Clone for TranslationQueue<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Holds the Draining state; dropping it (including on task abort) returns
/// the queue to Idle.
struct DrainGuard<I> {
    inner: Arc<Inner<I>>,
}

impl<I> Drop for DrainGuard<I> {
    fn drop(&mut self) {
        self.inner.draining.store(false, Ordering::SeqCst);
    }
}

/// Membership of one id in the in-flight set for the span of one provider call.
struct InFlightMarker<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlightMarker<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        if !lock(set).insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightMarker<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<I> TranslationQueue<I>
where
    I: Translatable + Send + Sync + 'static,
{
    pub fn new(cache: Arc<TranslationCache>, translator: Arc<Translator>, pacing: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                translator,
                pacing,
                items: RwLock::new(ItemIndex::default()),
                visibility: Mutex::new(VisibilityTracker::new()),
                in_flight: Mutex::new(HashSet::new()),
                translation_mode: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                metrics: TranslationMetrics::new(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.inner.cache
    }

    /// Swap in a freshly loaded feed. Visibility is left alone: it belongs
    /// to the screen, not to one page of results.
    pub fn replace_items(&self, items: impl IntoIterator<Item = I>) {
        let mut index = ItemIndex::default();
        for item in items {
            let id = item.item_id().to_string();
            if index.by_id.contains_key(&id) {
                debug!("Ignoring duplicate feed item {}", id);
                continue;
            }
            index.by_id.insert(id, index.items.len());
            index.items.push(item);
        }
        info!("Translation queue now tracks {} feed items", index.items.len());
        *self.inner.items.write().unwrap_or_else(PoisonError::into_inner) = index;
    }

    pub fn item_count(&self) -> usize {
        self.read_items().items.len()
    }

    /// Feed items in the order they were supplied.
    pub fn items(&self) -> Vec<I>
    where
        I: Clone,
    {
        self.read_items().items.clone()
    }

    pub fn with_item<R>(&self, id: &str, f: impl FnOnce(&I) -> R) -> Option<R> {
        let index = self.read_items();
        index.by_id.get(id).map(|&pos| f(&index.items[pos]))
    }

    pub fn translation_enabled(&self) -> bool {
        self.inner.translation_mode.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Switch translation mode. Turning it on starts a pass if none is
    /// running; turning it off makes a running pass stop at its next item.
    pub fn set_translation_mode(&self, enabled: bool) -> Option<JoinHandle<DrainReport>> {
        let was = self.inner.translation_mode.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!("Translation mode {}", if enabled { "on" } else { "off" });
        }
        if enabled {
            self.trigger()
        } else {
            None
        }
    }

    /// Record that an item was laid out. Starts a pass when this is a new id
    /// and translation mode is on.
    pub fn mark_rendered(&self, id: &str) -> Option<JoinHandle<DrainReport>> {
        let grew = lock(&self.inner.visibility).mark_rendered(id);
        if grew && self.translation_enabled() {
            self.trigger()
        } else {
            None
        }
    }

    /// Spawn a drain pass if translation mode is on, something is visible,
    /// and no pass is running.
    pub fn trigger(&self) -> Option<JoinHandle<DrainReport>> {
        if !self.translation_enabled() || lock(&self.inner.visibility).is_empty() {
            return None;
        }
        let guard = self.try_begin_pass()?;
        let queue = self.clone();
        Some(tokio::spawn(async move { queue.run_pass(guard).await }))
    }

    /// Run a pass on the current task instead of spawning one. Returns
    /// `None` if a pass is already running.
    pub async fn drain(&self) -> Option<DrainReport> {
        let guard = self.try_begin_pass()?;
        Some(self.run_pass(guard).await)
    }

    pub fn is_translating(&self, id: &str) -> bool {
        lock(&self.inner.in_flight).contains(id)
    }

    /// Cached translation regardless of mode.
    pub fn translated_text(&self, id: &str) -> Option<String> {
        self.inner.cache.get(id)
    }

    /// Text to show for an item: the cached translation when translation
    /// mode is on and one exists, otherwise the original. `None` for unknown
    /// ids and items without body text.
    pub fn display_text(&self, id: &str) -> Option<String> {
        let original = self
            .with_item(id, |item| item.translatable_text().map(str::to_owned))
            .flatten()?;
        if self.translation_enabled() {
            if let Some(translated) = self.inner.cache.get(id) {
                return Some(translated);
            }
        }
        Some(original)
    }

    pub fn visible_ids(&self) -> Vec<String> {
        lock(&self.inner.visibility).snapshot()
    }

    pub fn metrics(&self) -> MetricsReport {
        self.inner.metrics.report()
    }

    pub async fn clear_translations(&self) -> Result<()> {
        self.inner.cache.clear().await
    }

    fn read_items(&self) -> std::sync::RwLockReadGuard<'_, ItemIndex<I>> {
        self.inner.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_begin_pass(&self) -> Option<DrainGuard<I>> {
        self.inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(DrainGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    fn translatable_text(&self, id: &str) -> Option<String> {
        self.with_item(id, |item| item.translatable_text().map(str::to_owned))
            .flatten()
    }

    async fn run_pass(&self, _guard: DrainGuard<I>) -> DrainReport {
        let snapshot = lock(&self.inner.visibility).snapshot();
        let mut report = DrainReport {
            snapshot_len: snapshot.len(),
            ..DrainReport::default()
        };
        debug!("Translation pass started over {} visible items", snapshot.len());

        for id in snapshot {
            if !self.translation_enabled() {
                report.cancelled = true;
                info!("Translation mode switched off, stopping pass");
                break;
            }

            if self.inner.cache.contains(&id) {
                self.inner.metrics.record_cache_hit();
                report.already_cached += 1;
                continue;
            }

            let Some(text) = self.translatable_text(&id) else {
                report.skipped += 1;
                continue;
            };

            let Some(marker) = InFlightMarker::acquire(&self.inner.in_flight, &id) else {
                debug!("{} is already being translated, skipping", id);
                report.skipped += 1;
                continue;
            };

            self.inner.metrics.record_cache_miss();
            self.inner.metrics.record_api_call();
            let outcome = self.inner.translator.translate_with_outcome(&text).await;
            if outcome.is_fallback() {
                self.inner.metrics.record_api_failure();
                report.fallbacks += 1;
            } else {
                report.translated += 1;
            }
            self.inner.cache.put(&id, outcome.text()).await;
            drop(marker);

            tokio::time::sleep(self.inner.pacing).await;
        }

        info!(
            "Translation pass finished: {} translated, {} fallbacks, {} cached, {} skipped{}",
            report.translated,
            report.fallbacks,
            report.already_cached,
            report.skipped,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::translation::{TranslationProvider, TranslationSettings, TRANSLATION_STORAGE_KEY};
    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    #[derive(Debug, Clone)]
    enum TestItem {
        Post { id: String, text: String },
        Clip { id: String },
    }

    impl TestItem {
        fn post(id: &str, text: &str) -> Self {
            Self::Post {
                id: id.to_string(),
                text: text.to_string(),
            }
        }

        fn clip(id: &str) -> Self {
            Self::Clip { id: id.to_string() }
        }
    }

    impl Translatable for TestItem {
        fn item_id(&self) -> &str {
            match self {
                Self::Post { id, .. } | Self::Clip { id } => id,
            }
        }

        fn translatable_text(&self) -> Option<&str> {
            match self {
                Self::Post { text, .. } => Some(text),
                Self::Clip { .. } => None,
            }
        }
    }

    /// Records start/end of every call; fails for texts containing "FAIL".
    #[derive(Default)]
    struct RecordingProvider {
        events: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl RecordingProvider {
        fn with_delay(delay: Duration) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                delay,
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn calls(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
                .collect()
        }
    }

    #[async_trait]
    impl TranslationProvider for RecordingProvider {
        async fn request(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
            self.events.lock().unwrap().push(format!("start:{}", text));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.events.lock().unwrap().push(format!("end:{}", text));
            if text.contains("FAIL") {
                anyhow::bail!("provider down");
            }
            Ok(format!("<{}>", text))
        }
    }

    /// Hands every request to the test and waits for the test's answer.
    struct GatedProvider {
        requests: mpsc::UnboundedSender<(String, oneshot::Sender<String>)>,
    }

    #[async_trait]
    impl TranslationProvider for GatedProvider {
        async fn request(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
            let (tx, rx) = oneshot::channel();
            self.requests.send((text.to_string(), tx))?;
            Ok(rx.await?)
        }
    }

    fn build_queue(
        provider: Arc<dyn TranslationProvider>,
        store: Arc<dyn KeyValueStore>,
        pacing: Duration,
    ) -> TranslationQueue<TestItem> {
        let cache = Arc::new(TranslationCache::new(store));
        let translator = Arc::new(Translator::new(provider, TranslationSettings::default()));
        TranslationQueue::new(cache, translator, pacing)
    }

    fn quick_queue(provider: Arc<dyn TranslationProvider>) -> TranslationQueue<TestItem> {
        build_queue(provider, Arc::new(MemoryStore::new()), Duration::from_millis(1))
    }

    // ==================== Trigger Tests ====================

    #[tokio::test]
    async fn test_no_pass_while_mode_off() {
        let provider = Arc::new(RecordingProvider::default());
        let queue = quick_queue(provider.clone());
        queue.replace_items(vec![TestItem::post("p1", "こんにちは")]);

        assert!(queue.mark_rendered("p1").is_none());
        assert!(queue.trigger().is_none());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_enabling_with_nothing_visible_starts_nothing() {
        let queue = quick_queue(Arc::new(RecordingProvider::default()));
        queue.replace_items(vec![TestItem::post("p1", "こんにちは")]);
        assert!(queue.set_translation_mode(true).is_none());
    }

    #[tokio::test]
    async fn test_repeat_render_does_not_trigger() {
        let queue = quick_queue(Arc::new(RecordingProvider::default()));
        queue.replace_items(vec![TestItem::post("p1", "こんにちは")]);
        queue.set_translation_mode(true);

        let first = queue.mark_rendered("p1").expect("new id should trigger");
        first.await.unwrap();
        assert!(queue.mark_rendered("p1").is_none());
    }

    // ==================== Scenario Tests ====================

    #[tokio::test]
    async fn test_enable_translates_visible_post() {
        let provider = Arc::new(RecordingProvider::default());
        let store = Arc::new(MemoryStore::new());
        let queue = build_queue(provider.clone(), store.clone(), Duration::from_millis(1));
        queue.replace_items(vec![TestItem::post("p1", "こんにちは")]);
        queue.mark_rendered("p1");

        let report = queue.set_translation_mode(true).unwrap().await.unwrap();

        assert_eq!(report.translated, 1);
        assert_eq!(provider.calls(), vec!["こんにちは"]);
        assert_eq!(queue.translated_text("p1").as_deref(), Some("<こんにちは>"));
        assert!(!queue.translated_text("p1").unwrap().ends_with("..."));
        let raw = store.get_item(TRANSLATION_STORAGE_KEY).await.unwrap().unwrap();
        assert!(raw.contains("p1"));
    }

    #[tokio::test]
    async fn test_cached_item_makes_no_call() {
        let provider = Arc::new(RecordingProvider::default());
        let queue = quick_queue(provider.clone());
        queue.cache().put("p1", "Hello").await;
        queue.replace_items(vec![TestItem::post("p1", "こんにちは")]);
        queue.mark_rendered("p1");

        let report = queue.set_translation_mode(true).unwrap().await.unwrap();

        assert_eq!(report.already_cached, 1);
        assert!(provider.calls().is_empty());
        assert_eq!(queue.display_text("p1").as_deref(), Some("Hello"));
        assert_eq!(queue.metrics().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_long_post_cached_with_marker() {
        let provider = Arc::new(RecordingProvider::default());
        let queue = quick_queue(provider.clone());
        let text = "と".repeat(600);
        queue.replace_items(vec![TestItem::post("p2", &text)]);
        queue.mark_rendered("p2");

        queue.set_translation_mode(true).unwrap().await.unwrap();

        assert_eq!(provider.calls()[0].chars().count(), 450);
        assert!(queue.translated_text("p2").unwrap().ends_with("..."));
    }

    #[tokio::test]
    async fn test_toggle_off_during_call_stops_after_current_item() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = quick_queue(Arc::new(GatedProvider { requests: tx }));
        queue.replace_items(vec![
            TestItem::post("a", "あ"),
            TestItem::post("b", "い"),
            TestItem::post("c", "う"),
        ]);
        for id in ["a", "b", "c"] {
            queue.mark_rendered(id);
        }

        let pass = queue.set_translation_mode(true).unwrap();
        let (text, reply) = rx.recv().await.unwrap();
        assert_eq!(text, "あ");
        assert!(queue.is_translating("a"));

        // Off while "a" is in flight: "a" still completes, nothing after it starts.
        queue.set_translation_mode(false);
        reply.send("A".to_string()).unwrap();
        let report = pass.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.translated, 1);
        assert!(!queue.is_translating("a"));
        assert_eq!(queue.translated_text("a").as_deref(), Some("A"));
        assert!(queue.translated_text("b").is_none());
        assert!(queue.translated_text("c").is_none());
        assert!(rx.try_recv().is_err());

        // Re-enable: fresh pass picks up b and c only.
        let pass = queue.set_translation_mode(true).unwrap();
        for expected in ["い", "う"] {
            let (text, reply) = rx.recv().await.unwrap();
            assert_eq!(text, expected);
            reply.send(format!("T{}", expected)).unwrap();
        }
        let report = pass.await.unwrap();
        assert_eq!(report.already_cached, 1);
        assert_eq!(report.translated, 2);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_toggle_off_during_pacing_stops_pass() {
        let provider = Arc::new(RecordingProvider::default());
        let queue = build_queue(
            provider.clone(),
            Arc::new(MemoryStore::new()),
            Duration::from_millis(300),
        );
        queue.replace_items(vec![TestItem::post("a", "あ"), TestItem::post("b", "い")]);
        queue.mark_rendered("a");
        queue.mark_rendered("b");

        let pass = queue.set_translation_mode(true).unwrap();
        while queue.translated_text("a").is_none() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        queue.set_translation_mode(false);
        let report = pass.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(provider.calls(), vec!["あ"]);
    }

    #[tokio::test]
    async fn test_storage_read_failure_still_translates() {
        struct BrokenStore;

        #[async_trait]
        impl KeyValueStore for BrokenStore {
            async fn get_item(&self, _key: &str) -> Result<Option<String>> {
                anyhow::bail!("disk on fire")
            }
            async fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
                anyhow::bail!("disk on fire")
            }
            async fn remove_item(&self, _key: &str) -> Result<()> {
                anyhow::bail!("disk on fire")
            }
        }

        let provider = Arc::new(RecordingProvider::default());
        let queue = build_queue(provider.clone(), Arc::new(BrokenStore), Duration::from_millis(1));
        assert!(queue.cache().load().await.is_empty());
        queue.replace_items(vec![TestItem::post("p1", "こんにちは")]);
        queue.mark_rendered("p1");

        queue.set_translation_mode(true).unwrap().await.unwrap();

        assert_eq!(queue.translated_text("p1").as_deref(), Some("<こんにちは>"));
    }

    // ==================== Ordering & Exclusion Tests ====================

    #[tokio::test]
    async fn test_calls_follow_render_order_without_interleaving() {
        let provider = Arc::new(RecordingProvider::with_delay(Duration::from_millis(5)));
        let queue = quick_queue(provider.clone());
        queue.replace_items(vec![
            TestItem::post("a", "A"),
            TestItem::post("b", "B"),
            TestItem::post("c", "C"),
        ]);
        for id in ["c", "a", "b"] {
            queue.mark_rendered(id);
        }

        queue.set_translation_mode(true).unwrap().await.unwrap();

        assert_eq!(
            provider.events(),
            vec!["start:C", "end:C", "start:A", "end:A", "start:B", "end:B"]
        );
    }

    #[tokio::test]
    async fn test_second_trigger_while_draining_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = quick_queue(Arc::new(GatedProvider { requests: tx }));
        queue.replace_items(vec![TestItem::post("a", "あ"), TestItem::post("b", "い")]);
        queue.mark_rendered("a");
        queue.set_translation_mode(true);

        let pass = queue.trigger();
        assert!(pass.is_none(), "pass from set_translation_mode is still running");

        let (_, reply) = rx.recv().await.unwrap();
        assert!(queue.is_draining());
        // "b" becomes visible mid-pass: no second pass, and this pass won't see it.
        assert!(queue.mark_rendered("b").is_none());
        assert!(queue.drain().await.is_none());
        reply.send("A".to_string()).unwrap();

        while queue.is_draining() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(queue.translated_text("b").is_none());

        // The next trigger picks it up.
        let pass = queue.trigger().unwrap();
        let (text, reply) = rx.recv().await.unwrap();
        assert_eq!(text, "い");
        reply.send("I".to_string()).unwrap();
        pass.await.unwrap();
        assert_eq!(queue.translated_text("b").as_deref(), Some("I"));
    }

    #[tokio::test]
    async fn test_manual_drain_blocked_while_spawned_pass_runs() {
        let provider = Arc::new(RecordingProvider::with_delay(Duration::from_millis(20)));
        let queue = quick_queue(provider.clone());
        queue.replace_items(vec![TestItem::post("a", "あ")]);
        queue.mark_rendered("a");
        queue.set_translation_mode(true);

        // A manual pass racing the spawned one cannot start.
        assert!(queue.drain().await.is_none());
        while queue.is_draining() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(provider.calls(), vec!["あ"]);
    }

    #[tokio::test]
    async fn test_in_flight_id_is_skipped_by_another_pass() {
        let provider = Arc::new(RecordingProvider::default());
        let queue = quick_queue(provider.clone());
        queue.replace_items(vec![TestItem::post("a", "あ")]);
        queue.mark_rendered("a");
        queue.inner.translation_mode.store(true, Ordering::SeqCst);

        let marker = InFlightMarker::acquire(&queue.inner.in_flight, "a").unwrap();
        assert!(InFlightMarker::acquire(&queue.inner.in_flight, "a").is_none());
        let report = queue.drain().await.unwrap();
        drop(marker);

        assert_eq!(report.skipped, 1);
        assert!(provider.calls().is_empty());
        assert!(!queue.is_translating("a"));
    }

    #[tokio::test]
    async fn test_clips_and_unknown_ids_are_skipped() {
        let provider = Arc::new(RecordingProvider::default());
        let queue = quick_queue(provider.clone());
        queue.replace_items(vec![TestItem::clip("v1"), TestItem::post("p1", "ね")]);
        for id in ["v1", "ghost", "p1"] {
            queue.mark_rendered(id);
        }

        let report = queue.set_translation_mode(true).unwrap().await.unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.translated, 1);
        assert_eq!(provider.calls(), vec!["ね"]);
        assert!(queue.display_text("v1").is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_does_not_abort_pass() {
        let provider = Arc::new(RecordingProvider::default());
        let queue = quick_queue(provider.clone());
        queue.replace_items(vec![
            TestItem::post("a", "FAIL me"),
            TestItem::post("b", "fine"),
        ]);
        queue.mark_rendered("a");
        queue.mark_rendered("b");

        let report = queue.set_translation_mode(true).unwrap().await.unwrap();

        assert_eq!(report.fallbacks, 1);
        assert_eq!(report.translated, 1);
        assert_eq!(queue.translated_text("a").as_deref(), Some("FAIL me"));
        assert_eq!(queue.translated_text("b").as_deref(), Some("<fine>"));
        let metrics = queue.metrics();
        assert_eq!(metrics.api_calls, 2);
        assert_eq!(metrics.api_failures, 1);
    }

    // ==================== Display Tests ====================

    #[tokio::test]
    async fn test_display_text_follows_mode() {
        let queue = quick_queue(Arc::new(RecordingProvider::default()));
        queue.cache().put("p1", "Hello").await;
        queue.replace_items(vec![TestItem::post("p1", "こんにちは")]);

        assert_eq!(queue.display_text("p1").as_deref(), Some("こんにちは"));
        queue.inner.translation_mode.store(true, Ordering::SeqCst);
        assert_eq!(queue.display_text("p1").as_deref(), Some("Hello"));
        assert_eq!(queue.display_text("missing"), None);
    }

    #[tokio::test]
    async fn test_replace_items_keeps_visibility_and_order() {
        let queue = quick_queue(Arc::new(RecordingProvider::default()));
        queue.mark_rendered("p1");
        queue.replace_items(vec![
            TestItem::post("p2", "b"),
            TestItem::post("p1", "a"),
            TestItem::post("p2", "dup"),
        ]);

        assert_eq!(queue.item_count(), 2);
        let ids: Vec<String> = queue.items().iter().map(|i| i.item_id().to_string()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
        assert_eq!(queue.visible_ids(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_aborted_pass_releases_guard() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = quick_queue(Arc::new(GatedProvider { requests: tx }));
        queue.replace_items(vec![TestItem::post("a", "あ")]);
        queue.mark_rendered("a");

        let pass = queue.set_translation_mode(true).unwrap();
        let _request = rx.recv().await.unwrap();
        pass.abort();
        let _ = pass.await;

        assert!(!queue.is_draining());
        assert!(!queue.is_translating("a"));
    }

    #[tokio::test]
    async fn test_clear_translations() {
        let queue = quick_queue(Arc::new(RecordingProvider::default()));
        queue.cache().put("p1", "Hello").await;
        queue.clear_translations().await.unwrap();
        assert!(queue.translated_text("p1").is_none());
    }
}
