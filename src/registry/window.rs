// src/registry/window.rs
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    latency_ms: i64,
    at: Instant,
}

struct Inner {
    entries: VecDeque<Entry>,
    sum: i64,
}

/// Time-and-count-bounded FIFO of response-time samples for one backend.
///
/// `add`/`average`/`slow_ratio`/`count` all prune stale entries before
/// reading, so the aggregates and the queue never disagree.
pub struct ResponseTimeWindow {
    window: Duration,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl ResponseTimeWindow {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                sum: 0,
            }),
        }
    }

    /// Record a sample at `now`. Negative latencies are rejected (no-op).
    pub fn add(&self, latency_ms: i64, now: Instant) {
        if latency_ms < 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.entries.push_back(Entry {
            latency_ms,
            at: now,
        });
        inner.sum += latency_ms;
        Self::evict(&mut inner, self.window, self.max_entries, now);
    }

    pub fn average(&self) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        Self::evict(&mut inner, self.window, self.max_entries, Instant::now());
        if inner.entries.is_empty() {
            return 0.0;
        }
        inner.sum as f64 / inner.entries.len() as f64
    }

    /// Fraction of in-window samples whose latency exceeds `threshold_ms`.
    pub fn slow_ratio(&self, threshold_ms: i64) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        Self::evict(&mut inner, self.window, self.max_entries, Instant::now());
        if inner.entries.is_empty() {
            return 0.0;
        }
        let slow = inner
            .entries
            .iter()
            .filter(|e| e.latency_ms > threshold_ms)
            .count();
        slow as f64 / inner.entries.len() as f64
    }

    pub fn count(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        Self::evict(&mut inner, self.window, self.max_entries, Instant::now());
        inner.entries.len()
    }

    pub fn has_enough(&self, min: usize) -> bool {
        self.count() >= min
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.sum = 0;
    }

    /// Drop entries older than `now - window`, then drop the oldest until
    /// `entries.len() <= max_entries`.
    fn evict(inner: &mut Inner, window: Duration, max_entries: usize, now: Instant) {
        while let Some(front) = inner.entries.front() {
            if now.saturating_duration_since(front.at) > window {
                let dropped = inner.entries.pop_front().unwrap();
                inner.sum -= dropped.latency_ms;
            } else {
                break;
            }
        }
        while inner.entries.len() > max_entries {
            let dropped = inner.entries.pop_front().unwrap();
            inner.sum -= dropped.latency_ms;
        }
    }
}
