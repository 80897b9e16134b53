use std::collections::HashSet;

/// Ids of feed items that have been rendered at least once, in the order
/// they were first rendered. Only ever grows.
#[derive(Debug, Default, Clone)]
pub struct VisibilityTracker {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl VisibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` was laid out on screen. Returns `true` if this is
    /// the first time, `false` for repeat calls.
    pub fn mark_rendered(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push(id.to_string());
        true
    }

    /// First-rendered-first, which approximates top-to-bottom scroll order.
    pub fn snapshot(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
