// src/balancer/round_robin.rs
use super::SelectionStrategy;
use crate::registry::BackendRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared monotonic counter, advanced atomically; even distribution is
/// expected only in expectation under contention (SPEC_FULL §4.G).
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SelectionStrategy for RoundRobinStrategy {
    async fn select(&self, snapshot: &[Arc<BackendRecord>]) -> Option<Arc<BackendRecord>> {
        let n = snapshot.len();
        if n == 0 {
            return None;
        }
        for _ in 0..n {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % n;
            let candidate = &snapshot[index];
            if candidate.healthy() {
                return Some(candidate.clone());
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
