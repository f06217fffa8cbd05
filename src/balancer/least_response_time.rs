// src/balancer/least_response_time.rs
use super::SelectionStrategy;
use crate::registry::BackendRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Linear scan for the minimum `emaLatencyMs` among still-healthy records;
/// ties resolved by first-encountered order (SPEC_FULL §4.G).
pub struct LeastResponseTimeStrategy;

impl LeastResponseTimeStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastResponseTimeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SelectionStrategy for LeastResponseTimeStrategy {
    async fn select(&self, snapshot: &[Arc<BackendRecord>]) -> Option<Arc<BackendRecord>> {
        let mut best: Option<&Arc<BackendRecord>> = None;
        for candidate in snapshot {
            if !candidate.healthy() {
                continue;
            }
            match best {
                None => best = Some(candidate),
                Some(current) if candidate.ema_latency_ms() < current.ema_latency_ms() => {
                    best = Some(candidate)
                }
                _ => {}
            }
        }
        best.cloned()
    }

    fn name(&self) -> &'static str {
        "least-response-time"
    }
}
