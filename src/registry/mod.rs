// src/registry/mod.rs
mod discovery;
mod record;
mod window;

pub use discovery::{DiscoverySource, FileDiscovery, StaticDiscovery};
pub use record::{BackendRecord, BackendUrl};
pub use window::ResponseTimeWindow;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Tunables a freshly-discovered [`BackendRecord`] is seeded with.
#[derive(Debug, Clone, Copy)]
pub struct RecordDefaults {
    pub initial_latency_ms: i64,
    pub window_time: Duration,
    pub window_max_entries: usize,
}

/// Component D: reconciles a [`DiscoverySource`] into tracked
/// [`BackendRecord`]s behind a reader/writer lock.
pub struct ServerRegistry {
    discovery: Arc<dyn DiscoverySource>,
    defaults: RecordDefaults,
    records: RwLock<HashMap<BackendUrl, Arc<BackendRecord>>>,
}

impl ServerRegistry {
    pub fn new(discovery: Arc<dyn DiscoverySource>, defaults: RecordDefaults) -> Self {
        Self {
            discovery,
            defaults,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn discovery_name(&self) -> &'static str {
        self.discovery.name()
    }

    pub fn supports_dynamic(&self) -> bool {
        self.discovery.supports_dynamic()
    }

    /// Fetch the discovery list; insert unseen URLs as fresh records, and
    /// — only if the source supports dynamic updates — remove records whose
    /// URL is no longer present.
    pub async fn reconcile(&self) {
        let discovered = self.discovery.list().await;
        let wanted: std::collections::HashSet<&str> =
            discovered.iter().map(|s| s.as_str()).collect();

        let mut records = self.records.write().await;

        let mut added = 0usize;
        for url in &discovered {
            if !records.contains_key(url) {
                records.insert(
                    url.clone(),
                    Arc::new(BackendRecord::new(
                        url.clone(),
                        self.defaults.initial_latency_ms,
                        self.defaults.window_time,
                        self.defaults.window_max_entries,
                    )),
                );
                added += 1;
            }
        }

        let mut removed = 0usize;
        if self.discovery.supports_dynamic() {
            let to_remove: Vec<BackendUrl> = records
                .keys()
                .filter(|url| !wanted.contains(url.as_str()))
                .cloned()
                .collect();
            for url in to_remove {
                records.remove(&url);
                removed += 1;
            }
        }

        if added > 0 || removed > 0 {
            info!(added, removed, total = records.len(), "reconciled server registry");
        } else {
            debug!(total = records.len(), "reconcile: no changes");
        }
    }

    /// Records that are `healthy && !stillInSlowCooldown(cooldown)` at the
    /// moment of observation.
    pub async fn healthy_snapshot(&self, cooldown: Duration) -> Vec<Arc<BackendRecord>> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| r.healthy() && !r.still_in_slow_cooldown(cooldown))
            .cloned()
            .collect()
    }

    pub async fn all_snapshot(&self) -> Vec<Arc<BackendRecord>> {
        let records = self.records.read().await;
        records.values().cloned().collect()
    }

    pub async fn get(&self, url: &str) -> Option<Arc<BackendRecord>> {
        self.records.read().await.get(url).cloned()
    }

    /// No-op if the URL is absent from the registry.
    pub async fn mark_unhealthy(&self, url: &str, reason: &str) {
        if let Some(record) = self.get(url).await {
            tracing::warn!(url, reason, "marking backend unhealthy");
            record.set_healthy(false);
        }
    }

    /// No-op if the URL is absent from the registry.
    pub async fn record_latency(
        &self,
        url: &str,
        latency_ms: i64,
        slow_threshold_ms: i64,
        slowness_window_size: usize,
        slowness_threshold_ratio: f64,
    ) {
        if let Some(record) = self.get(url).await {
            record.record_latency(
                latency_ms,
                slow_threshold_ms,
                slowness_window_size,
                slowness_threshold_ratio,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> RecordDefaults {
        RecordDefaults {
            initial_latency_ms: 200,
            window_time: Duration::from_secs(30),
            window_max_entries: 5,
        }
    }

    #[tokio::test]
    async fn reconcile_populates_static_source() {
        let source = Arc::new(StaticDiscovery::new(vec!["http://a".into(), "http://b".into()]));
        let registry = ServerRegistry::new(source, defaults());
        registry.reconcile().await;
        let all = registry.all_snapshot().await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let source = Arc::new(StaticDiscovery::new(vec!["http://a".into()]));
        let registry = ServerRegistry::new(source, defaults());
        registry.reconcile().await;
        let first: Vec<String> = registry
            .all_snapshot()
            .await
            .into_iter()
            .map(|r| r.url.clone())
            .collect();
        registry.reconcile().await;
        let second: Vec<String> = registry
            .all_snapshot()
            .await
            .into_iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn static_source_never_removes_records() {
        let source = Arc::new(StaticDiscovery::new(vec!["http://a".into()]));
        let registry = ServerRegistry::new(source, defaults());
        registry.reconcile().await;
        // a static source always returns the same list, so there is nothing
        // to remove on a second reconcile; verify the removal branch is
        // skipped (not merely a no-op) by checking supports_dynamic.
        assert!(!registry.supports_dynamic());
        registry.reconcile().await;
        assert_eq!(registry.all_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn healthy_snapshot_excludes_cooldown_and_unhealthy() {
        let source = Arc::new(StaticDiscovery::new(vec!["http://a".into(), "http://b".into()]));
        let registry = ServerRegistry::new(source, defaults());
        registry.reconcile().await;

        registry.mark_unhealthy("http://a", "boom").await;
        let healthy = registry.healthy_snapshot(Duration::from_secs(60)).await;
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].url, "http://b");
    }

    #[tokio::test]
    async fn get_and_mutators_are_noop_for_absent_url() {
        let source = Arc::new(StaticDiscovery::new(vec!["http://a".into()]));
        let registry = ServerRegistry::new(source, defaults());
        registry.reconcile().await;
        assert!(registry.get("http://missing").await.is_none());
        registry.mark_unhealthy("http://missing", "x").await;
        registry
            .record_latency("http://missing", 5, 1000, 5, 0.6)
            .await;
    }
}
