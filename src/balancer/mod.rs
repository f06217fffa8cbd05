// src/balancer/mod.rs
mod least_response_time;
mod round_robin;

pub use least_response_time::LeastResponseTimeStrategy;
pub use round_robin::RoundRobinStrategy;

use crate::config::StrategyKind;
use crate::registry::BackendRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Component G: a pure function over a caller-provided healthy snapshot.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    async fn select(&self, snapshot: &[Arc<BackendRecord>]) -> Option<Arc<BackendRecord>>;

    fn name(&self) -> &'static str;
}

pub fn create_strategy(kind: StrategyKind) -> Arc<dyn SelectionStrategy> {
    match kind {
        StrategyKind::LeastResponseTime => Arc::new(LeastResponseTimeStrategy::new()),
        // "round-robin" and any unrecognized value fall back to round-robin,
        // matching the teacher's `create_load_balancer` exhaustive-match
        // shape generalized to a default arm.
        StrategyKind::RoundRobin | StrategyKind::Unknown => Arc::new(RoundRobinStrategy::new()),
    }
}
