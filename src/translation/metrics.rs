//! Translation metrics, one instance per queue.
//!
//! The queue records a hit or miss for every visible post it walks, and a
//! call (plus a failure when the provider fell back) for every request.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct TranslationMetrics {
    /// Visible posts that already had a cached translation
    cache_hits: AtomicUsize,

    /// Visible posts that needed a provider call
    cache_misses: AtomicUsize,

    /// Provider calls made
    api_calls: AtomicUsize,

    /// Provider calls that fell back to the original text
    api_failures: AtomicUsize,
}

impl TranslationMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A visible post was already translated.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A visible post had no cached translation.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A request was sent to the provider.
    pub fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// The provider failed and the original text was kept.
    pub fn record_api_failure(&self) {
        self.api_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> usize {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn api_failures(&self) -> usize {
        self.api_failures.load(Ordering::Relaxed)
    }

    /// Snapshot the counters with derived percentages.
    ///
    /// A rate is 0 when nothing has been counted yet. Failures never exceed
    /// calls, but the success rate saturates rather than going negative.
    pub fn report(&self) -> MetricsReport {
        let cache_hits = self.cache_hits();
        let cache_misses = self.cache_misses();
        let api_calls = self.api_calls();
        let api_failures = self.api_failures();

        MetricsReport {
            cache_hits,
            cache_misses,
            cache_hit_rate: percentage(cache_hits, cache_hits + cache_misses),
            api_calls,
            api_failures,
            api_success_rate: percentage(api_calls.saturating_sub(api_failures), api_calls),
        }
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / whole as f64
}

/// Point-in-time translation statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Percentage, 0-100
    pub cache_hit_rate: f64,
    pub api_calls: usize,
    pub api_failures: usize,
    /// Percentage, 0-100
    pub api_success_rate: f64,
}
