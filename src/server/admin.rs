// src/server/admin.rs
use crate::balancer::SelectionStrategy;
use crate::registry::{BackendRecord, ServerRegistry};
use hyper::{Body, Response};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Read-only inspection surface (component I admin routes). Every handler
/// takes a registry snapshot and projects it to JSON; none of them consult
/// the forwarding engine or mutate anything.
pub struct AdminHandlers {
    registry: Arc<ServerRegistry>,
    strategy: Arc<dyn SelectionStrategy>,
    cooldown: Duration,
}

#[derive(Serialize)]
struct BackendHealthView {
    url: String,
    healthy: bool,
    #[serde(rename = "averageResponseTime")]
    average_response_time: f64,
    #[serde(rename = "lastHealthCheck")]
    last_health_check: Option<u128>,
    #[serde(rename = "consecutiveFailures")]
    consecutive_failures: usize,
    #[serde(rename = "inSlowCooldown")]
    in_slow_cooldown: bool,
}

#[derive(Serialize)]
struct StrategyView {
    strategy: &'static str,
}

#[derive(Serialize)]
struct StatsView {
    #[serde(rename = "totalServers")]
    total_servers: usize,
    #[serde(rename = "healthyServers")]
    healthy_servers: usize,
    #[serde(rename = "unhealthyServers")]
    unhealthy_servers: usize,
    #[serde(rename = "averageResponseTime")]
    average_response_time: i64,
    strategy: &'static str,
}

#[derive(Serialize)]
struct DiscoveryView {
    #[serde(rename = "strategyName")]
    strategy_name: &'static str,
    #[serde(rename = "supportsDynamicUpdates")]
    supports_dynamic_updates: bool,
    #[serde(rename = "discoveredServers")]
    discovered_servers: Vec<String>,
    #[serde(rename = "serverCount")]
    server_count: usize,
}

impl AdminHandlers {
    pub fn new(
        registry: Arc<ServerRegistry>,
        strategy: Arc<dyn SelectionStrategy>,
        cooldown: Duration,
    ) -> Self {
        Self {
            registry,
            strategy,
            cooldown,
        }
    }

    pub async fn health(&self) -> Response<Body> {
        let records = self.registry.all_snapshot().await;
        let view: Vec<BackendHealthView> = records.iter().map(|r| project_health(r)).collect();
        json_response(&view)
    }

    pub async fn strategy(&self) -> Response<Body> {
        json_response(&StrategyView {
            strategy: self.strategy.name(),
        })
    }

    pub async fn stats(&self) -> Response<Body> {
        let all = self.registry.all_snapshot().await;
        let healthy: Vec<&Arc<BackendRecord>> = all
            .iter()
            .filter(|r| r.healthy() && !r.still_in_slow_cooldown(self.cooldown))
            .collect();

        let average = if healthy.is_empty() {
            0
        } else {
            let sum: i64 = healthy.iter().map(|r| r.ema_latency_ms()).sum();
            ((sum as f64 / healthy.len() as f64).round()) as i64
        };

        json_response(&StatsView {
            total_servers: all.len(),
            healthy_servers: healthy.len(),
            unhealthy_servers: all.len() - healthy.len(),
            average_response_time: average,
            strategy: self.strategy.name(),
        })
    }

    pub async fn discovery(&self) -> Response<Body> {
        let all = self.registry.all_snapshot().await;
        let discovered: Vec<String> = all.iter().map(|r| r.url.clone()).collect();
        json_response(&DiscoveryView {
            strategy_name: self.registry.discovery_name(),
            supports_dynamic_updates: self.registry.supports_dynamic(),
            server_count: discovered.len(),
            discovered_servers: discovered,
        })
    }
}

fn project_health(record: &Arc<BackendRecord>) -> BackendHealthView {
    BackendHealthView {
        url: record.url.clone(),
        healthy: record.healthy(),
        average_response_time: record.window.average(),
        last_health_check: record
            .last_health_check_at()
            .map(|instant| instant.elapsed().as_millis()),
        consecutive_failures: record.consecutive_failures(),
        in_slow_cooldown: record.in_slow_cooldown(),
    }
}

fn json_response<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => Response::builder()
            .status(200)
            .header("Content-Type", "application/json")
            .body(Body::from(bytes))
            .expect("serialized JSON is always a valid body"),
        Err(e) => Response::builder()
            .status(500)
            .body(Body::from(format!("failed to serialize admin response: {e}")))
            .expect("static status/body is always a valid response"),
    }
}
