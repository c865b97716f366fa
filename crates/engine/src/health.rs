//! Dependency health aggregation.
//!
//! Every registered [`Probe`] runs concurrently under a shared per-probe
//! timeout. The overall status is `ok` only when every service reports
//! `healthy`; a probe that times out or panics counts as unhealthy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::dlq::{DeadLetterStore, StoreError};

/// Per-service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl ServiceHealth {
    pub fn healthy() -> Self {
        Self {
            status: ServiceStatus::Healthy,
            error: None,
            response_time_ms: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Unhealthy,
            error: Some(error.into()),
            response_time_ms: None,
        }
    }

    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Disconnected,
            error: Some(error.into()),
            response_time_ms: None,
        }
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// Overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Point-in-time view of every dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub services: BTreeMap<String, ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn from_services(services: BTreeMap<String, ServiceHealth>) -> Self {
        let status = if services.values().all(ServiceHealth::is_healthy) {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            services,
            timestamp: Utc::now(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// A single dependency check. Probes report failures as values, never panic
/// on purpose, and are expected to be cheap.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Key under which the result appears in [`HealthSnapshot::services`].
    fn name(&self) -> &str;

    async fn probe(&self) -> ServiceHealth;
}

/// Pings the dead-letter store.
pub struct StoreProbe {
    store: Arc<dyn DeadLetterStore>,
}

impl StoreProbe {
    pub const NAME: &'static str = "dlq_store";

    pub fn new(store: Arc<dyn DeadLetterStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Probe for StoreProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self) -> ServiceHealth {
        let started = Instant::now();
        let health = match self.store.ping().await {
            Ok(()) => ServiceHealth::healthy(),
            Err(e @ StoreError::Disconnected(_)) => ServiceHealth::disconnected(e.to_string()),
            Err(e) => ServiceHealth::unhealthy(e.to_string()),
        };
        health.with_response_time(started.elapsed())
    }
}

/// Runs all probes concurrently and folds them into a [`HealthSnapshot`].
pub struct HealthAggregator {
    probes: Vec<Arc<dyn Probe>>,
    timeout: Duration,
}

impl HealthAggregator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            timeout,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub async fn check(&self) -> HealthSnapshot {
        let mut slots: Vec<Option<ServiceHealth>> = vec![None; self.probes.len()];
        let mut set = JoinSet::new();

        for (idx, probe) in self.probes.iter().enumerate() {
            let probe = Arc::clone(probe);
            let timeout = self.timeout;
            set.spawn(async move {
                let health = match tokio::time::timeout(timeout, probe.probe()).await {
                    Ok(health) => health,
                    Err(_) => ServiceHealth::unhealthy(format!(
                        "probe timed out after {}ms",
                        timeout.as_millis()
                    )),
                };
                (idx, health)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, health)) => slots[idx] = Some(health),
                Err(e) => warn!(error = %e, "health probe task failed"),
            }
        }

        let services: BTreeMap<String, ServiceHealth> = self
            .probes
            .iter()
            .zip(slots)
            .map(|(probe, slot)| {
                let health =
                    slot.unwrap_or_else(|| ServiceHealth::unhealthy("probe did not complete"));
                (probe.name().to_string(), health)
            })
            .collect();

        let snapshot = HealthSnapshot::from_services(services);
        debug!(status = ?snapshot.status, "health check complete");
        snapshot
    }
}
