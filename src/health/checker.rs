// src/health/checker.rs
use crate::registry::ServerRegistry;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

/// Shape of a health-probe response body: `{"status": "UP"}`.
#[derive(Debug, Deserialize)]
struct HealthBody {
    status: Option<String>,
}

/// Component E: timer-driven probing of every registered backend.
pub struct HealthMonitor {
    registry: Arc<ServerRegistry>,
    client: Client,
    interval: Duration,
    probe_timeout: Duration,
    cooldown: Duration,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServerRegistry>,
        interval: Duration,
        probe_timeout: Duration,
        cooldown: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(probe_timeout)
            .build()
            .expect("failed to build health-check HTTP client");
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        Self {
            registry,
            client,
            interval,
            probe_timeout,
            cooldown,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(interval = ?self.interval, "starting health monitor");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        if self.registry.supports_dynamic() {
            self.registry.reconcile().await;
        }

        let backends = self.registry.all_snapshot().await;
        let probes = backends.into_iter().map(|record| {
            let client = self.client.clone();
            let probe_timeout = self.probe_timeout;
            let cooldown = self.cooldown;
            tokio::spawn(async move {
                let url = record.url.clone();
                let healthy = probe_one(&client, &url, probe_timeout).await;
                record.apply_health_probe(healthy, cooldown);
                (url, healthy)
            })
        });

        let results = futures::future::join_all(probes).await;
        let mut up = 0usize;
        let mut down = 0usize;
        for result in results {
            match result {
                Ok((url, true)) => {
                    up += 1;
                    debug!(url, "backend healthy");
                }
                Ok((url, false)) => {
                    down += 1;
                    warn!(url, "backend unhealthy");
                }
                Err(e) => {
                    down += 1;
                    warn!(error = %e, "health probe task failed");
                }
            }
        }
        debug!(up, down, "health monitor tick complete");
    }
}

/// `GET {url}/actuator/health`; healthy iff the body's `status` field
/// case-insensitively equals `UP`. Any transport error, non-2xx, or
/// malformed body is unhealthy.
async fn probe_one(client: &Client, url: &str, probe_timeout: Duration) -> bool {
    let target = format!("{}/actuator/health", url.trim_end_matches('/'));
    let result = timeout(probe_timeout, client.get(&target).send()).await;

    let response = match result {
        Ok(Ok(response)) => response,
        Ok(Err(_)) | Err(_) => return false,
    };

    if !response.status().is_success() {
        return false;
    }

    match response.json::<HealthBody>().await {
        Ok(body) => body
            .status
            .map(|s| s.eq_ignore_ascii_case("UP"))
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RecordDefaults, StaticDiscovery};
    use mockito::Server;

    #[tokio::test]
    async fn probe_healthy_on_up_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/actuator/health")
            .with_status(200)
            .with_body(r#"{"status":"UP"}"#)
            .create_async()
            .await;

        let client = Client::new();
        let healthy = probe_one(&client, &server.url(), Duration::from_secs(1)).await;
        assert!(healthy);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn probe_unhealthy_on_down_status_case_insensitive() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/actuator/health")
            .with_status(200)
            .with_body(r#"{"status":"down"}"#)
            .create_async()
            .await;

        let client = Client::new();
        let healthy = probe_one(&client, &server.url(), Duration::from_secs(1)).await;
        assert!(!healthy);
    }

    #[tokio::test]
    async fn probe_healthy_accepts_mixed_case_up() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/actuator/health")
            .with_status(200)
            .with_body(r#"{"status":"Up"}"#)
            .create_async()
            .await;

        let client = Client::new();
        let healthy = probe_one(&client, &server.url(), Duration::from_secs(1)).await;
        assert!(healthy);
    }

    #[tokio::test]
    async fn probe_unhealthy_on_non_2xx() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/actuator/health")
            .with_status(503)
            .with_body(r#"{"status":"UP"}"#)
            .create_async()
            .await;

        let client = Client::new();
        let healthy = probe_one(&client, &server.url(), Duration::from_secs(1)).await;
        assert!(!healthy);
    }

    #[tokio::test]
    async fn probe_unhealthy_on_malformed_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/actuator/health")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = Client::new();
        let healthy = probe_one(&client, &server.url(), Duration::from_secs(1)).await;
        assert!(!healthy);
    }

    #[tokio::test]
    async fn probe_unhealthy_on_connection_refused() {
        let client = Client::new();
        let healthy = probe_one(&client, "http://127.0.0.1:1", Duration::from_millis(200)).await;
        assert!(!healthy);
    }

    #[tokio::test]
    async fn tick_updates_registry_health_flags() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/actuator/health")
            .with_status(200)
            .with_body(r#"{"status":"UP"}"#)
            .create_async()
            .await;

        let discovery = Arc::new(StaticDiscovery::new(vec![server.url()]));
        let registry = Arc::new(ServerRegistry::new(
            discovery,
            RecordDefaults {
                initial_latency_ms: 200,
                window_time: Duration::from_secs(30),
                window_max_entries: 5,
            },
        ));
        registry.reconcile().await;

        let monitor = HealthMonitor::new(
            registry.clone(),
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(60),
        );
        monitor.tick().await;

        let record = registry.get(&server.url()).await.unwrap();
        assert!(record.healthy());
        assert!(record.last_health_check_at().is_some());
    }

    #[tokio::test]
    async fn health_probe_latencies_never_enter_slowness_window() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/actuator/health")
            .with_status(200)
            .with_body(r#"{"status":"UP"}"#)
            .create_async()
            .await;

        let discovery = Arc::new(StaticDiscovery::new(vec![server.url()]));
        let registry = Arc::new(ServerRegistry::new(
            discovery,
            RecordDefaults {
                initial_latency_ms: 200,
                window_time: Duration::from_secs(30),
                window_max_entries: 5,
            },
        ));
        registry.reconcile().await;

        let monitor = HealthMonitor::new(
            registry.clone(),
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(60),
        );
        for _ in 0..10 {
            monitor.tick().await;
        }

        let record = registry.get(&server.url()).await.unwrap();
        assert_eq!(record.window.count(), 0);
    }
}
