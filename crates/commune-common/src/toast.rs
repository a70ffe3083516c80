use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Severity level for transient user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// A transient message shown to the user, e.g. when a remote write fails.
#[derive(Debug, Clone)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub body: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl Toast {
    /// Creates an info toast with a 5-second TTL.
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_level(ToastLevel::Info, title, body, Duration::from_secs(5))
    }

    /// Creates a warning toast with an 8-second TTL.
    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_level(ToastLevel::Warning, title, body, Duration::from_secs(8))
    }

    /// Creates an error toast with a 10-second TTL.
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_level(ToastLevel::Error, title, body, Duration::from_secs(10))
    }

    fn with_level(
        level: ToastLevel,
        title: impl Into<String>,
        body: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            level,
            title: title.into(),
            body: body.into(),
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Returns `true` if this toast has exceeded its TTL.
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// A bounded queue of toasts that evicts expired entries on access.
#[derive(Debug)]
pub struct ToastQueue {
    items: VecDeque<Toast>,
    capacity: usize,
}

impl ToastQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a toast, evicting expired entries first.
    /// If still at capacity after eviction, the oldest entry is removed.
    pub fn push(&mut self, toast: Toast) {
        self.evict_expired();
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(toast);
    }

    /// Returns all non-expired toasts, oldest first.
    pub fn visible(&mut self) -> Vec<&Toast> {
        self.evict_expired();
        self.items.iter().collect()
    }

    /// Removes and returns every non-expired toast.
    pub fn drain(&mut self) -> Vec<Toast> {
        self.evict_expired();
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn evict_expired(&mut self) {
        self.items.retain(|t| !t.is_expired());
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_carry_expected_ttls() {
        assert_eq!(Toast::info("a", "b").ttl, Duration::from_secs(5));
        assert_eq!(Toast::warning("a", "b").ttl, Duration::from_secs(8));
        assert_eq!(Toast::error("a", "b").ttl, Duration::from_secs(10));
        assert_eq!(Toast::error("a", "b").level, ToastLevel::Error);
    }

    #[test]
    fn push_evicts_oldest_when_full() {
        let mut queue = ToastQueue::new(2);
        queue.push(Toast::info("first", ""));
        queue.push(Toast::info("second", ""));
        queue.push(Toast::info("third", ""));

        let titles: Vec<_> = queue.visible().iter().map(|t| t.title.clone()).collect();
        assert_eq!(titles, vec!["second", "third"]);
    }

    #[test]
    fn expired_toasts_are_hidden() {
        let mut queue = ToastQueue::default();
        let mut stale = Toast::warning("stale", "");
        stale.ttl = Duration::ZERO;
        queue.push(stale);
        queue.push(Toast::error("fresh", "write failed"));

        let visible = queue.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "fresh");
    }

    #[test]
    fn drain_empties_the_queue() {
        let mut queue = ToastQueue::default();
        queue.push(Toast::info("a", ""));
        queue.push(Toast::info("b", ""));
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
    }
}
